//! Batch deletion engine.
//!
//! Per collection the engine counts the matching documents, then repeatedly
//! fetches the identities of the oldest batch, deletes exactly those
//! identities, records the result and paces itself:
//!
//! ```text
//! COUNTING ──dry run──▶ DRY_REPORT ──▶ DONE
//!     │
//!     ├──count > 0──▶ DELETING ──empty fetch / snapshot reached──▶ DONE
//!     └──count = 0──────────────────────────────────────────────▶ DONE
//! ```
//!
//! An empty fetch is the authoritative end of a collection. The count taken
//! before the loop is only a snapshot: concurrent writers can push the real
//! number either way, so reaching it is a secondary exit.
//!
//! A stop request abandons counts, fetches and pacing sleeps immediately. A
//! delete already sent is awaited and recorded first, so the tally always
//! covers what the server committed.

use std::{future::Future, sync::Arc, time::Duration};

use mongodb::bson::Document;
use thiserror::Error;
use tokio::time::Instant;

use super::{
    filter::RetentionQuery,
    report::{ProgressEvent, ProgressSink},
    retry::with_retry,
    stats::DeletionStats,
    stop::StopSignal,
};
use crate::{
    config::ExecutionConfig,
    store::{DocumentStore, StoreError},
};

/// Why a collection was not processed to the end.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stop was requested. Every committed delete has been recorded.
    #[error("Stopped on request")]
    Stopped,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// How batches are selected: `batch_size` documents at a time, ascending by
/// the age field so the oldest documents always go first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub batch_size: u32,
    pub sort_field: String,
}

impl BatchPlan {
    pub fn new(query: &RetentionQuery, batch_size: u32) -> Self {
        Self {
            batch_size,
            sort_field: query.age_field.clone(),
        }
    }
}

/// Running state for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionRun {
    /// Matching documents counted before the loop started. Never re-queried.
    pub total_matching: u64,
    pub total_deleted: u64,
    progress_since_last_report: u64,
}

impl CollectionRun {
    pub fn new(total_matching: u64) -> Self {
        Self {
            total_matching,
            ..Default::default()
        }
    }

    fn record(&mut self, deleted: u64) {
        self.total_deleted += deleted;
        self.progress_since_last_report += deleted;
    }

    /// Whether a progress line is due; resets the counter when it is.
    fn take_progress(&mut self, interval: u64) -> bool {
        if self.progress_since_last_report >= interval {
            self.progress_since_last_report = 0;
            true
        } else {
            false
        }
    }

    fn snapshot_reached(&self) -> bool {
        self.total_deleted >= self.total_matching
    }
}

/// Result of processing one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionReport {
    pub collection: String,
    /// Documents matching the query when the collection was counted.
    pub matched: u64,
    /// Documents actually deleted. Always 0 for a dry run.
    pub deleted: u64,
    pub dry_run: bool,
}

/// Time to wait after a batch so that throughput stays at or below `rate`
/// documents per second, given the batch already took `elapsed`.
pub fn rate_limit_delay(deleted: u64, rate: u32, elapsed: Duration) -> Duration {
    if rate == 0 {
        return Duration::ZERO;
    }
    let budget = Duration::from_secs_f64(deleted as f64 / f64::from(rate));
    budget.saturating_sub(elapsed)
}

/// Deletes expired documents collection by collection.
///
/// Every deletion is added to the shared [`DeletionStats`] as soon as the
/// store confirms it, so an interrupted run can still report what it did.
pub struct DeletionEngine {
    store: Arc<dyn DocumentStore>,
    stats: DeletionStats,
    sink: Arc<dyn ProgressSink>,
    execution: ExecutionConfig,
    stop: StopSignal,
}

impl DeletionEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        stats: DeletionStats,
        sink: Arc<dyn ProgressSink>,
        execution: ExecutionConfig,
    ) -> Self {
        Self {
            store,
            stats,
            sink,
            execution,
            stop: StopSignal::never(),
        }
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Run a read-only store call unless a stop is, or becomes, pending.
    async fn unless_stopped<T>(
        &self,
        operation: impl Future<Output = Result<T, StoreError>>,
    ) -> EngineResult<T> {
        tokio::select! {
            biased;
            () = self.stop.stopped() => Err(EngineError::Stopped),
            result = operation => Ok(result?),
        }
    }

    /// Count, then either report (dry run) or delete, the documents of
    /// `collection` matching `query`.
    #[tracing::instrument(
        skip(self, query),
        fields(age_field = %query.age_field, cutoff = %query.cutoff, dry_run = self.execution.dry_run)
    )]
    pub async fn process(
        &self,
        collection: &str,
        query: &RetentionQuery,
    ) -> EngineResult<CollectionReport> {
        let filter = query.to_document();
        let store = self.store.as_ref();
        let filter_ref = &filter;

        let matched = self
            .unless_stopped(with_retry(
                &self.execution.retry,
                collection,
                "count",
                move || store.count(collection, filter_ref),
            ))
            .await?;

        tracing::info!(collection, matched, "Counted documents to delete");

        if self.execution.dry_run {
            self.sink.emit(ProgressEvent::DryRun {
                collection: collection.to_string(),
                matched,
            });
            return Ok(CollectionReport {
                collection: collection.to_string(),
                matched,
                deleted: 0,
                dry_run: true,
            });
        }

        self.stats.begin(collection);
        let mut run = CollectionRun::new(matched);

        if matched > 0 {
            let plan = BatchPlan::new(query, self.execution.batch_size);
            self.delete_batches(collection, &filter, &plan, &mut run)
                .await?;
        }

        self.sink.emit(ProgressEvent::Completed {
            collection: collection.to_string(),
            deleted: run.total_deleted,
        });
        tracing::info!(
            collection,
            matched,
            deleted = run.total_deleted,
            "Collection cleanup completed"
        );

        Ok(CollectionReport {
            collection: collection.to_string(),
            matched,
            deleted: run.total_deleted,
            dry_run: false,
        })
    }

    async fn delete_batches(
        &self,
        collection: &str,
        filter: &Document,
        plan: &BatchPlan,
        run: &mut CollectionRun,
    ) -> EngineResult<()> {
        let store = self.store.as_ref();
        let retry = &self.execution.retry;
        let sort_field = plan.sort_field.as_str();
        let batch_size = plan.batch_size;
        let mut batch = 0u64;

        loop {
            let started = Instant::now();

            let ids = self
                .unless_stopped(with_retry(retry, collection, "fetch", move || {
                    store.oldest_ids(collection, filter, sort_field, batch_size)
                }))
                .await?;

            if ids.is_empty() {
                tracing::info!(
                    collection,
                    deleted = run.total_deleted,
                    "No more old documents to delete"
                );
                return Ok(());
            }

            let ids_ref = ids.as_slice();
            let deleted = with_retry(retry, collection, "delete", move || {
                store.delete_ids(collection, ids_ref)
            })
            .await?;

            run.record(deleted);
            self.stats.record(collection, deleted);
            batch += 1;

            tracing::debug!(
                collection,
                batch,
                fetched = ids.len(),
                deleted,
                total_deleted = run.total_deleted,
                "Deleted batch"
            );

            if run.take_progress(self.execution.progress_interval) {
                self.sink.emit(ProgressEvent::Progress {
                    collection: collection.to_string(),
                    deleted: run.total_deleted,
                    total: run.total_matching,
                });
            }

            if self.stop.is_stopped() {
                tracing::info!(
                    collection,
                    deleted = run.total_deleted,
                    "Stop requested, not starting another batch"
                );
                return Err(EngineError::Stopped);
            }

            self.pace(deleted, started.elapsed()).await?;

            if run.snapshot_reached() {
                return Ok(());
            }
        }
    }

    async fn pace(&self, deleted: u64, elapsed: Duration) -> EngineResult<()> {
        if let Some(rate) = self.execution.rate_limit() {
            let delay = rate_limit_delay(deleted, rate.get(), elapsed);
            self.sleep(delay).await?;
        }

        self.sleep(self.execution.inter_batch_sleep()).await
    }

    async fn sleep(&self, duration: Duration) -> EngineResult<()> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            () = self.stop.stopped() => Err(EngineError::Stopped),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
