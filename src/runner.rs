//! Run orchestration.
//!
//! A run parses the filter, resolves the password, connects, enumerates the
//! target collections and hands each one to the [`DeletionEngine`]. The store
//! is closed on every exit path, including an interrupt.
//!
//! A shutdown before the store is open abandons secret resolution or the
//! connection attempt outright. Once deleting, a shutdown raises a
//! [`StopSignal`] instead, and the run ends after any in-flight delete has
//! been acknowledged and recorded.

use std::{collections::BTreeMap, future::Future, sync::Arc};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    config::{PurgeConfig, RetentionConfig},
    error::{PurgeError, RunFailure},
    retention::{
        CollectionReport, DeletionEngine, DeletionStats, EngineError, ProgressEvent,
        ProgressSink, RetentionQuery, StdoutSink, StopSignal, cutoff, parse_filter, with_retry,
    },
    secrets::{self, SecretManager},
    store::{DocumentStore, StoreConnector, StoreResult},
};

/// Prefix of collections managed by the server itself.
const SYSTEM_COLLECTION_PREFIX: &str = "system.";

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub dry_run: bool,
    /// Per-collection results in processing order.
    pub collections: Vec<CollectionReport>,
    /// Per-collection deletions, ordered by name.
    pub deleted: BTreeMap<String, u64>,
}

impl RunSummary {
    pub fn total_deleted(&self) -> u64 {
        self.deleted.values().sum()
    }

    pub fn total_matched(&self) -> u64 {
        self.collections.iter().map(|c| c.matched).sum()
    }
}

/// Resolve which collections a run covers.
///
/// An explicit name is returned as-is without checking that it exists; an
/// unknown collection simply matches nothing. Otherwise every collection the
/// database reports is returned in the order reported, minus `system.*`
/// unless `include_system_collections` is set.
pub async fn enumerate_collections(
    store: &dyn DocumentStore,
    retention: &RetentionConfig,
) -> StoreResult<Vec<String>> {
    if let Some(collection) = &retention.collection {
        return Ok(vec![collection.clone()]);
    }

    let mut names = store.list_collections().await?;
    if !retention.include_system_collections {
        names.retain(|name| !name.starts_with(SYSTEM_COLLECTION_PREFIX));
    }
    Ok(names)
}

/// Drives one purge run.
pub struct Runner {
    config: PurgeConfig,
    connector: Arc<dyn StoreConnector>,
    secrets: Option<Arc<dyn SecretManager>>,
    sink: Arc<dyn ProgressSink>,
    stats: DeletionStats,
    now: Option<DateTime<Utc>>,
}

impl Runner {
    pub fn new(config: PurgeConfig, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            config,
            connector,
            secrets: None,
            sink: Arc::new(StdoutSink),
            stats: DeletionStats::new(),
            now: None,
        }
    }

    /// Use `manager` for `secret-ref:` passwords instead of the configured backend.
    pub fn with_secret_manager(mut self, manager: Arc<dyn SecretManager>) -> Self {
        self.secrets = Some(manager);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Compute the cutoff from `now` instead of the current time.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Handle to the running deletion tally.
    pub fn stats(&self) -> DeletionStats {
        self.stats.clone()
    }

    /// Run until done or until SIGINT/SIGTERM.
    pub async fn run(&self) -> Result<RunSummary, RunFailure> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until done or until `shutdown` resolves.
    ///
    /// On failure the returned [`RunFailure`] carries every deletion
    /// committed before the run stopped.
    pub async fn run_until(
        &self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunSummary, RunFailure> {
        let run_id = Uuid::new_v4();

        match self.execute(run_id, shutdown).await {
            Ok(summary) => {
                tracing::info!(
                    %run_id,
                    dry_run = summary.dry_run,
                    collections = summary.collections.len(),
                    total_deleted = summary.total_deleted(),
                    deleted = ?summary.deleted,
                    "Run complete"
                );
                Ok(summary)
            }
            Err(error) => {
                let deleted = self.stats.snapshot();
                match &error {
                    PurgeError::Interrupted => {
                        tracing::info!(%run_id, "Execution interrupted");
                        tracing::info!(%run_id, deleted = ?deleted, "Deleted records summary");
                    }
                    other => {
                        tracing::error!(
                            %run_id,
                            kind = other.kind(),
                            error = %other,
                            deleted = ?deleted,
                            "Run failed"
                        );
                    }
                }
                Err(RunFailure { error, deleted })
            }
        }
    }

    async fn execute(
        &self,
        run_id: Uuid,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunSummary, PurgeError> {
        tokio::pin!(shutdown);

        // Everything that can fail without contacting the database goes first.
        let extra_filter = parse_filter(&self.config.retention.filter)?;

        let store = tokio::select! {
            result = self.open_store(run_id) => result?,
            () = &mut shutdown => return Err(PurgeError::Interrupted),
        };

        let (stop, signal) = StopSignal::channel();
        let work = self.process_all(run_id, store.clone(), extra_filter, signal);
        tokio::pin!(work);

        let outcome = tokio::select! {
            result = &mut work => result,
            () = &mut shutdown => {
                tracing::info!(%run_id, "Stopping after the in-flight batch");
                stop.stop();
                // a run that still finishes was interrupted all the same
                work.await.and(Err(PurgeError::Interrupted))
            }
        };

        store.close().await;
        outcome
    }

    async fn open_store(&self, run_id: Uuid) -> Result<Arc<dyn DocumentStore>, PurgeError> {
        let password = self.resolve_password().await?;

        let connection = &self.config.connection;
        tracing::info!(
            %run_id,
            uri = %connection.redacted_uri(),
            database = connection.database.as_deref().unwrap_or_default(),
            "Connecting to MongoDB"
        );

        self.connector
            .connect(connection, password)
            .await
            .map_err(PurgeError::Connection)
    }

    async fn resolve_password(&self) -> Result<Option<String>, PurgeError> {
        let connection = &self.config.connection;
        let Some(name) = connection.password_secret_ref() else {
            return Ok(connection.password.clone());
        };

        let manager = match &self.secrets {
            Some(manager) => Some(manager.clone()),
            None => secrets::from_config(&self.config.secrets).await?,
        };

        let password = secrets::resolve_secret(manager.as_deref(), name).await?;
        Ok(Some(password))
    }

    async fn process_all(
        &self,
        run_id: Uuid,
        store: Arc<dyn DocumentStore>,
        extra_filter: mongodb::bson::Document,
        stop: StopSignal,
    ) -> Result<RunSummary, PurgeError> {
        let retention = &self.config.retention;
        let execution = &self.config.execution;

        let listing = with_retry(&execution.retry, "*", "list_collections", || {
            enumerate_collections(store.as_ref(), retention)
        });
        let collections = tokio::select! {
            biased;
            () = stop.stopped() => return Err(PurgeError::Interrupted),
            result = listing => result.map_err(PurgeError::ListCollections)?,
        };

        let cutoff = cutoff(retention.days_to_keep, self.now.unwrap_or_else(Utc::now));
        tracing::info!(
            %run_id,
            collections = collections.len(),
            days_to_keep = retention.days_to_keep,
            %cutoff,
            age_field = %retention.age_field,
            dry_run = execution.dry_run,
            "Starting purge"
        );

        let engine = DeletionEngine::new(
            store,
            self.stats.clone(),
            self.sink.clone(),
            execution.clone(),
        )
        .with_stop(stop.clone());

        let mut reports = Vec::with_capacity(collections.len());
        for collection in collections {
            if stop.is_stopped() {
                return Err(PurgeError::Interrupted);
            }
            tracing::info!(%run_id, collection = %collection, "Processing collection");
            self.sink.emit(ProgressEvent::Processing {
                collection: collection.clone(),
            });

            let query = RetentionQuery::new(&retention.age_field, cutoff, extra_filter.clone());
            let report = engine
                .process(&collection, &query)
                .await
                .map_err(|error| match error {
                    EngineError::Stopped => PurgeError::Interrupted,
                    EngineError::Store(source) => PurgeError::Operation {
                        collection: collection.clone(),
                        source,
                    },
                })?;
            reports.push(report);
        }

        Ok(RunSummary {
            run_id,
            dry_run: execution.dry_run,
            collections: reports,
            deleted: self.stats.non_zero(),
        })
    }
}

/// Resolves on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
///
/// If a handler cannot be installed that signal is ignored.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Termination signal received");
}
