//! Application layer: the two services and the plumbing they share.
//!
//! The transaction service persists records and publishes screening requests.
//! The anti-fraud service consumes those requests and publishes verdicts,
//! which flow back into the transaction service's [`reconciler`]. Both sides
//! consume through the same per-partition [`consumer`] pipeline and publish
//! through the same [`producer`].

pub mod anti_fraud;
pub mod consumer;
pub mod producer;
pub mod reconciler;
pub mod runtime;
pub mod transactions;
