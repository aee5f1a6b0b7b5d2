//! End-to-end run scenarios against the in-memory store.
//!
//! Each test drives a full [`Runner`]: filter parsing, secret resolution,
//! connection, enumeration, deletion and the final or interrupted report.

use std::{
    collections::{HashMap, HashSet},
    io,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use mongodb::bson::{self, Bson, Document, doc};
use parking_lot::Mutex;

use crate::{
    config::{self, ConfigOverrides, ConnectionConfig, PurgeConfig},
    error::PurgeError,
    retention::{ProgressEvent, RecordingSink, write_interrupted},
    runner::Runner,
    secrets::{MemorySecretManager, SecretManager, SecretResult},
    store::{DocumentStore, MemoryStore, StoreConnector, StoreOp, StoreResult},
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn millis(at: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(at.timestamp_millis())
}

/// `count` documents aged between 100 and roughly 101 days, ids starting at `first_id`.
fn expired(first_id: i64, count: i64) -> impl Iterator<Item = Document> {
    let base = now() - Duration::days(100);
    (0..count).map(move |i| {
        doc! {
            "_id": first_id + i,
            "timestamp": millis(base - Duration::seconds(i)),
            "status": if i % 2 == 0 { "inactive" } else { "active" },
        }
    })
}

/// `count` documents well inside the retention period.
fn recent(first_id: i64, count: i64) -> impl Iterator<Item = Document> {
    let base = now() - Duration::days(1);
    (0..count).map(move |i| {
        doc! {
            "_id": first_id + i,
            "timestamp": millis(base + Duration::seconds(i)),
            "status": "inactive",
        }
    })
}

fn overrides() -> ConfigOverrides {
    ConfigOverrides {
        uri: Some("mongodb://localhost:27017".into()),
        database: Some("telemetry".into()),
        sleep_secs: Some(0.0),
        ..Default::default()
    }
}

fn resolve(overrides: ConfigOverrides) -> PurgeConfig {
    config::resolve(None, overrides).unwrap()
}

fn runner(config: PurgeConfig, store: &Arc<MemoryStore>) -> (Runner, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let runner = Runner::new(config, Arc::new(store.clone()))
        .with_sink(sink.clone())
        .with_now(now());
    (runner, sink)
}

fn progress_lines(sink: &RecordingSink) -> Vec<String> {
    sink.events()
        .into_iter()
        .filter(|e| matches!(e, ProgressEvent::Progress { .. }))
        .map(|e| e.to_string())
        .collect()
}

#[tokio::test]
async fn test_three_batches_without_progress_line() {
    let store = Arc::new(MemoryStore::new().with_collection("events", expired(0, 12_000)));
    let config = resolve(ConfigOverrides {
        collection: Some("events".into()),
        batch_size: Some(5000),
        progress_interval: Some(20_000),
        ..overrides()
    });
    let (runner, sink) = runner(config, &store);

    let summary = runner.run_until(std::future::pending()).await.unwrap();

    let sizes: Vec<usize> = store.deletes().iter().map(|d| d.ids.len()).collect();
    assert_eq!(sizes, vec![5000, 5000, 2000]);
    assert!(progress_lines(&sink).is_empty());
    assert_eq!(
        sink.lines().last().map(String::as_str),
        Some("`events` cleanup completed. Total deleted: 12000 records.")
    );
    assert_eq!(summary.total_deleted(), 12_000);
    assert_eq!(store.document_count("events"), 0);
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_filter_on_empty_collection_never_enters_loop() {
    let store = Arc::new(MemoryStore::new().with_collection("events", []));
    let config = resolve(ConfigOverrides {
        collection: Some("events".into()),
        filter: Some(r#"{"status":"inactive"}"#.into()),
        ..overrides()
    });
    let (runner, sink) = runner(config, &store);

    let summary = runner.run_until(std::future::pending()).await.unwrap();

    assert!(store.fetches().is_empty());
    assert!(store.deletes().is_empty());
    assert_eq!(summary.collections[0].matched, 0);
    assert_eq!(
        sink.lines(),
        vec![
            "Processing `events`...".to_string(),
            "`events` cleanup completed. Total deleted: 0 records.".to_string(),
        ]
    );
    assert!(summary.deleted.is_empty());
}

/// Captures everything logged through `tracing` while installed.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

#[tokio::test]
async fn test_malformed_filter_fails_before_connecting() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let store = Arc::new(MemoryStore::new().with_collection("events", expired(0, 10)));
    let config = resolve(ConfigOverrides {
        filter: Some("{bad json".into()),
        ..overrides()
    });
    let (runner, sink) = runner(config, &store);

    let failure = runner.run_until(std::future::pending()).await.unwrap_err();

    assert!(matches!(failure.error, PurgeError::Filter(_)));
    assert_ne!(failure.exit_code(), 0);
    assert_eq!(store.connect_attempts(), 0);
    assert!(sink.events().is_empty());
    assert_eq!(store.document_count("events"), 10);

    let logs = logs.contents();
    assert!(!logs.contains("telemetry"), "{logs}");
    assert!(!logs.contains("Connecting"), "{logs}");
}

#[tokio::test]
async fn test_dry_run_is_idempotent_and_mutates_nothing() {
    let store = Arc::new(
        MemoryStore::new()
            .with_collection("events", expired(0, 40).chain(recent(1000, 15)))
            .with_collection("audit", expired(0, 7)),
    );
    let config = resolve(ConfigOverrides {
        dry_run: true,
        ..overrides()
    });

    let (first, _) = runner(config.clone(), &store);
    let (second, sink) = runner(config, &store);
    let first = first.run_until(std::future::pending()).await.unwrap();
    let second = second.run_until(std::future::pending()).await.unwrap();

    assert_eq!(first.total_matched(), 47);
    assert_eq!(second.total_matched(), first.total_matched());
    assert_eq!(store.document_count("events"), 55);
    assert_eq!(store.document_count("audit"), 7);
    assert!(store.fetches().is_empty());
    assert!(store.deletes().is_empty());
    assert!(second.deleted.is_empty());
    assert!(sink.events().contains(&ProgressEvent::DryRun {
        collection: "events".into(),
        matched: 40,
    }));
}

#[tokio::test]
async fn test_batches_are_disjoint_ordered_and_fetched() {
    // insert in scrambled age order so the store's natural order is useless
    let mut documents: Vec<Document> = expired(0, 97).collect();
    documents.sort_by_key(|d| (d.get_i64("_id").unwrap() * 37) % 97);
    let ages: HashMap<i64, bson::DateTime> = documents
        .iter()
        .map(|d| (d.get_i64("_id").unwrap(), *d.get_datetime("timestamp").unwrap()))
        .collect();
    let age = |id: &Bson| ages[&id.as_i64().unwrap()];

    let store = Arc::new(
        MemoryStore::new().with_collection("events", documents.into_iter().chain(recent(500, 5))),
    );
    let config = resolve(ConfigOverrides {
        collection: Some("events".into()),
        batch_size: Some(10),
        ..overrides()
    });
    let (runner, _) = runner(config, &store);

    runner.run_until(std::future::pending()).await.unwrap();

    let fetches = store.fetches();
    let deletes = store.deletes();
    assert_eq!(deletes.len(), 10);

    let mut seen = HashSet::new();
    for (fetch, delete) in fetches.iter().zip(&deletes) {
        for id in &delete.ids {
            assert!(fetch.ids.contains(id), "deleted an id that was not fetched");
            assert!(seen.insert(id.to_string()), "id {id} deleted twice");
        }
    }

    for pair in deletes.windows(2) {
        let newest = pair[0].ids.iter().map(age).max().unwrap();
        let oldest = pair[1].ids.iter().map(age).min().unwrap();
        assert!(newest <= oldest, "batch order went backwards");
    }

    assert_eq!(seen.len(), 97);
    assert_eq!(store.document_count("events"), 5);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_reports_exactly_what_was_deleted() {
    let store = Arc::new(MemoryStore::new().with_collection("events", expired(0, 50)));
    let config = resolve(ConfigOverrides {
        collection: Some("events".into()),
        batch_size: Some(10),
        sleep_secs: Some(0.5),
        ..overrides()
    });
    let (runner, _) = runner(config, &store);
    let stats = runner.stats();

    let mut deletes = store.subscribe_deletes();
    let shutdown = async move {
        let _ = deletes.wait_for(|calls| *calls >= 2).await;
    };

    let failure = runner.run_until(shutdown).await.unwrap_err();

    assert!(matches!(failure.error, PurgeError::Interrupted));
    assert_eq!(failure.exit_code(), 130);

    let applied: u64 = store.deletes().iter().map(|d| d.ids.len() as u64).sum();
    assert_eq!(applied, 20);
    assert_eq!(failure.deleted.get("events"), Some(&applied));
    assert_eq!(stats.get("events"), applied);
    assert_eq!(store.document_count("events"), 30);
    assert!(store.is_closed());

    let mut out = Vec::new();
    write_interrupted(&mut out, &failure.deleted).unwrap();
    let report = String::from_utf8(out).unwrap();
    assert!(report.contains("  - events: 20 documents deleted"), "{report}");
}

/// Applies deletes immediately but acknowledges them only after `delay`.
struct SlowAcknowledgement {
    inner: Arc<MemoryStore>,
    delay: std::time::Duration,
}

#[async_trait]
impl DocumentStore for SlowAcknowledgement {
    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn count(&self, collection: &str, filter: &Document) -> StoreResult<u64> {
        self.inner.count(collection, filter).await
    }

    async fn oldest_ids(
        &self,
        collection: &str,
        filter: &Document,
        sort_field: &str,
        limit: u32,
    ) -> StoreResult<Vec<Bson>> {
        self.inner
            .oldest_ids(collection, filter, sort_field, limit)
            .await
    }

    async fn delete_ids(&self, collection: &str, ids: &[Bson]) -> StoreResult<u64> {
        let deleted = self.inner.delete_ids(collection, ids).await?;
        tokio::time::sleep(self.delay).await;
        Ok(deleted)
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

#[async_trait]
impl StoreConnector for Arc<SlowAcknowledgement> {
    async fn connect(
        &self,
        _config: &ConnectionConfig,
        _password: Option<String>,
    ) -> StoreResult<Arc<dyn DocumentStore>> {
        Ok(self.clone())
    }
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_waits_for_acknowledged_delete() {
    let store = Arc::new(MemoryStore::new().with_collection("events", expired(0, 50)));
    let slow = Arc::new(SlowAcknowledgement {
        inner: store.clone(),
        delay: std::time::Duration::from_secs(1),
    });
    let config = resolve(ConfigOverrides {
        collection: Some("events".into()),
        batch_size: Some(10),
        ..overrides()
    });
    let runner = Runner::new(config, Arc::new(slow))
        .with_sink(Arc::new(RecordingSink::new()))
        .with_now(now());

    // fires while the second delete is committed but not yet acknowledged
    let mut deletes = store.subscribe_deletes();
    let shutdown = async move {
        let _ = deletes.wait_for(|calls| *calls >= 2).await;
    };

    let failure = runner.run_until(shutdown).await.unwrap_err();

    assert!(matches!(failure.error, PurgeError::Interrupted));
    assert_eq!(store.deletes().len(), 2);
    assert_eq!(store.document_count("events"), 30);
    assert_eq!(failure.deleted.get("events"), Some(&20));
    assert!(store.is_closed());
}

/// Never finishes connecting.
struct StalledConnector;

#[async_trait]
impl StoreConnector for StalledConnector {
    async fn connect(
        &self,
        _config: &ConnectionConfig,
        _password: Option<String>,
    ) -> StoreResult<Arc<dyn DocumentStore>> {
        std::future::pending().await
    }
}

/// Never answers a lookup.
struct StalledSecrets;

#[async_trait]
impl SecretManager for StalledSecrets {
    async fn get(&self, _key: &str) -> SecretResult<Option<String>> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_while_connecting() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let runner = Runner::new(resolve(overrides()), Arc::new(StalledConnector))
        .with_sink(Arc::new(RecordingSink::new()));

    let failure = runner
        .run_until(tokio::time::sleep(std::time::Duration::from_secs(5)))
        .await
        .unwrap_err();

    assert!(matches!(failure.error, PurgeError::Interrupted));
    assert_eq!(failure.exit_code(), 130);
    assert!(failure.deleted.is_empty());

    let logs = logs.contents();
    assert!(
        logs.lines()
            .any(|line| line.contains("INFO") && line.contains("Execution interrupted")),
        "{logs}"
    );
    assert!(!logs.contains("WARN"), "{logs}");
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_while_resolving_secret() {
    let store = Arc::new(MemoryStore::new());
    let config = resolve(ConfigOverrides {
        username: Some("purger".into()),
        password: Some("secret-ref:mongo-purger".into()),
        ..overrides()
    });
    let (runner, _) = runner(config, &store);
    let runner = runner.with_secret_manager(Arc::new(StalledSecrets));

    let failure = runner
        .run_until(tokio::time::sleep(std::time::Duration::from_secs(5)))
        .await
        .unwrap_err();

    assert_eq!(failure.exit_code(), 130);
    assert_eq!(store.connect_attempts(), 0);
}

#[tokio::test]
async fn test_operation_failure_keeps_partial_progress() {
    let store = Arc::new(MemoryStore::new().with_collection("events", expired(0, 30)));
    store.inject_fault(StoreOp::Delete, 2, false);
    let config = resolve(ConfigOverrides {
        collection: Some("events".into()),
        batch_size: Some(10),
        ..overrides()
    });
    let (runner, _) = runner(config, &store);

    let failure = runner.run_until(std::future::pending()).await.unwrap_err();

    assert!(matches!(
        failure.error,
        PurgeError::Operation { ref collection, .. } if collection == "events"
    ));
    assert_eq!(failure.exit_code(), 5);
    assert_eq!(failure.deleted.get("events"), Some(&10));
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_transient_failure_retried_when_configured() {
    let store = Arc::new(MemoryStore::new().with_collection("events", expired(0, 30)));
    store.inject_fault(StoreOp::Delete, 2, true);
    let mut config = resolve(ConfigOverrides {
        collection: Some("events".into()),
        batch_size: Some(10),
        ..overrides()
    });
    config.execution.retry.max_retries = 2;
    config.execution.retry.initial_delay_ms = 1;
    let (runner, _) = runner(config, &store);

    let summary = runner.run_until(std::future::pending()).await.unwrap();

    assert_eq!(summary.total_deleted(), 30);
}

#[tokio::test]
async fn test_connection_failure() {
    let store = Arc::new(MemoryStore::new().with_collection("events", expired(0, 5)));
    store.refuse_connections();
    let (runner, _) = runner(resolve(overrides()), &store);

    let failure = runner.run_until(std::future::pending()).await.unwrap_err();

    assert!(matches!(failure.error, PurgeError::Connection(_)));
    assert_eq!(failure.exit_code(), 4);
    assert_eq!(store.document_count("events"), 5);
}

#[tokio::test]
async fn test_secret_reference_resolved_before_connecting() {
    let store = Arc::new(MemoryStore::new());
    let config = resolve(ConfigOverrides {
        username: Some("purger".into()),
        password: Some("secret-ref:mongo-purger".into()),
        ..overrides()
    });
    let secrets = MemorySecretManager::new().with_secret("mongo-purger", "hunter2");
    let (runner, _) = runner(config, &store);
    let runner = runner.with_secret_manager(Arc::new(secrets));

    runner.run_until(std::future::pending()).await.unwrap();

    assert_eq!(store.connected_password().as_deref(), Some("hunter2"));
}

#[tokio::test]
async fn test_unresolvable_secret_aborts_before_connecting() {
    let store = Arc::new(MemoryStore::new());
    let config = resolve(ConfigOverrides {
        username: Some("purger".into()),
        password: Some("secret-ref:mongo-purger".into()),
        ..overrides()
    });
    let (runner, _) = runner(config, &store);
    let runner = runner.with_secret_manager(Arc::new(MemorySecretManager::new()));

    let failure = runner.run_until(std::future::pending()).await.unwrap_err();

    assert!(matches!(failure.error, PurgeError::Secret(_)));
    assert_eq!(failure.exit_code(), 3);
    assert_eq!(store.connect_attempts(), 0);
}

#[tokio::test]
async fn test_all_collections_summary_lists_non_zero_only() {
    let store = Arc::new(
        MemoryStore::new()
            .with_collection("events", expired(0, 12))
            .with_collection("sessions", recent(0, 4))
            .with_collection("system.profile", expired(0, 3)),
    );
    let (runner, sink) = runner(resolve(overrides()), &store);

    let summary = runner.run_until(std::future::pending()).await.unwrap();

    let processed: Vec<&str> = summary
        .collections
        .iter()
        .map(|c| c.collection.as_str())
        .collect();
    assert_eq!(processed, vec!["events", "sessions"]);
    assert_eq!(
        summary.deleted.into_iter().collect::<Vec<_>>(),
        vec![("events".to_string(), 12)]
    );
    assert_eq!(store.document_count("system.profile"), 3);
    assert!(sink.lines().contains(&"Processing `sessions`...".to_string()));
}

#[tokio::test]
async fn test_filter_narrows_and_colliding_age_constraint_holds() {
    let store = Arc::new(MemoryStore::new().with_collection("events", expired(0, 20)));
    // the extra filter reuses the age field, so both constraints must hold
    let floor = now() - Duration::days(100) - Duration::seconds(10);
    let filter = format!(
        r#"{{"status": "inactive", "timestamp": {{"$gt": {{"$date": {{"$numberLong": "{}"}}}}}}}}"#,
        floor.timestamp_millis()
    );
    let config = resolve(ConfigOverrides {
        collection: Some("events".into()),
        filter: Some(filter),
        ..overrides()
    });
    let (runner, _) = runner(config, &store);

    let summary = runner.run_until(std::future::pending()).await.unwrap();

    // ids 0..=9 are within 10s of the base; the even ones are inactive
    assert_eq!(summary.total_deleted(), 5);
    for document in store.documents("events") {
        let id = document.get_i64("_id").unwrap();
        assert!(id >= 10 || id % 2 == 1, "document {id} should have been deleted");
    }
}
