//! Human-readable progress output.
//!
//! These lines are the operator-facing console output and are written
//! independently of the structured log stream.

use std::{collections::BTreeMap, fmt, io};

use parking_lot::Mutex;

/// Something worth telling the operator while a run is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A collection is about to be counted.
    Processing { collection: String },
    /// Another `progress_interval` documents have been deleted.
    Progress {
        collection: String,
        deleted: u64,
        total: u64,
    },
    /// Dry run: how many documents would have been deleted.
    DryRun { collection: String, matched: u64 },
    /// A collection is finished.
    Completed { collection: String, deleted: u64 },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Processing { collection } => {
                write!(f, "Processing `{collection}`...")
            }
            ProgressEvent::Progress {
                collection,
                deleted,
                total,
            } => write!(f, "[{collection}] Deleted {deleted}/{total} documents"),
            ProgressEvent::DryRun {
                collection,
                matched,
            } => write!(
                f,
                "[DRY RUN] `{collection}`: {matched} documents would be deleted, no deletion performed."
            ),
            ProgressEvent::Completed {
                collection,
                deleted,
            } => write!(
                f,
                "`{collection}` cleanup completed. Total deleted: {deleted} records."
            ),
        }
    }
}

/// Receives progress events from the deletion engine.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Prints each event as a line on standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl ProgressSink for StdoutSink {
    fn emit(&self, event: ProgressEvent) {
        println!("{event}");
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Rendered lines, in emission order.
    pub fn lines(&self) -> Vec<String> {
        self.events.lock().iter().map(ToString::to_string).collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

/// Write the end-of-run summary. Only collections with deletions are listed.
pub fn write_summary(out: &mut impl io::Write, counts: &BTreeMap<String, u64>) -> io::Result<()> {
    writeln!(out, "=== Deletion Summary ===")?;
    write_counts(out, counts)
}

/// Write the report printed when a run is interrupted.
pub fn write_interrupted(
    out: &mut impl io::Write,
    counts: &BTreeMap<String, u64>,
) -> io::Result<()> {
    writeln!(out, "=== Execution Interrupted ===")?;
    writeln!(out, "Deleted records summary:")?;
    write_counts(out, counts)
}

fn write_counts(out: &mut impl io::Write, counts: &BTreeMap<String, u64>) -> io::Result<()> {
    let mut any = false;
    for (collection, count) in counts.iter().filter(|(_, count)| **count > 0) {
        writeln!(out, "  - {collection}: {count} documents deleted")?;
        any = true;
    }
    if !any {
        writeln!(out, "  (no documents deleted)")?;
    }
    Ok(())
}
