//! Domain types and the ports the services depend on.

pub mod events;
pub mod ports;
pub mod rules;
pub mod transaction;
