//! Structured logging.
//!
//! Log lines go to standard output or, when configured, to a file opened in
//! append mode. Formats: pretty, compact and JSON.

mod tracing_init;

pub use tracing_init::*;
