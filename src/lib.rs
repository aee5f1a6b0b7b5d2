//! Retention-policy enforcement for MongoDB.
//!
//! Deletes documents older than a retention period in paced, oldest-first
//! batches, keeping an exact per-collection tally that survives interrupts.
//!
//! The pieces, leaves first:
//! - [`retention::cutoff`] and [`retention::RetentionQuery`] decide what is expired
//! - [`retention::DeletionEngine`] deletes it batch by batch
//! - [`retention::DeletionStats`] tracks what has been deleted so far
//! - [`runner::Runner`] ties a run together and owns the connection
//! - [`store::DocumentStore`] is the database seam

pub mod config;
pub mod error;
pub mod observability;
pub mod retention;
pub mod runner;
pub mod secrets;
pub mod store;

#[cfg(test)]
mod tests;
