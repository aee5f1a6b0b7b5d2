//! Retention enforcement.
//!
//! Everything needed to turn a retention policy into deletions:
//! - the cutoff instant for a retention period
//! - the query combining the age predicate with an operator filter
//! - the batch deletion engine with pacing and progress reporting
//! - the shared deletion tally read by the interrupt path
//! - the stop request that ends a run between store calls

mod engine;
mod filter;
mod report;
mod retry;
mod stats;
mod stop;
mod threshold;

pub use engine::{
    BatchPlan, CollectionReport, CollectionRun, DeletionEngine, EngineError, EngineResult,
    rate_limit_delay,
};
pub use filter::{FilterError, RetentionQuery, parse_filter};
pub use report::{
    ProgressEvent, ProgressSink, RecordingSink, StdoutSink, write_interrupted, write_summary,
};
pub use retry::with_retry;
pub use stats::DeletionStats;
pub use stop::{StopHandle, StopSignal};
pub use threshold::cutoff;
