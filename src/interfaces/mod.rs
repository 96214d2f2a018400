//! Outer adapters used by the command-line runner.

pub mod csv;
