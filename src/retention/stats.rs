//! Running deletion tally, shared between the run loop and the interrupt path.

use std::{collections::BTreeMap, sync::Arc};

use dashmap::DashMap;

/// Documents deleted per collection during the current run.
///
/// Cloning is cheap and every clone observes the same tally. Counts only ever
/// grow, and each increment is applied atomically with respect to readers.
#[derive(Debug, Clone, Default)]
pub struct DeletionStats {
    counts: Arc<DashMap<String, u64>>,
}

impl DeletionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collection whose deletion phase is starting.
    ///
    /// Existing counts are left untouched.
    pub fn begin(&self, collection: &str) {
        self.counts.entry(collection.to_string()).or_insert(0);
    }

    /// Add `deleted` documents to a collection's tally.
    pub fn record(&self, collection: &str, deleted: u64) {
        *self.counts.entry(collection.to_string()).or_insert(0) += deleted;
    }

    pub fn get(&self, collection: &str) -> u64 {
        self.counts.get(collection).map_or(0, |c| *c)
    }

    /// Every registered collection with its count, ordered by name.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Collections with at least one deleted document, ordered by name.
    pub fn non_zero(&self) -> BTreeMap<String, u64> {
        let mut snapshot = self.snapshot();
        snapshot.retain(|_, count| *count > 0);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_registers_zero() {
        let stats = DeletionStats::new();
        stats.begin("events");
        assert_eq!(stats.snapshot().get("events"), Some(&0));
        assert!(stats.non_zero().is_empty());
    }

    #[test]
    fn test_begin_does_not_reset() {
        let stats = DeletionStats::new();
        stats.record("events", 10);
        stats.begin("events");
        assert_eq!(stats.get("events"), 10);
    }

    #[test]
    fn test_clones_share_the_tally() {
        let stats = DeletionStats::new();
        let observer = stats.clone();

        stats.begin("audit");
        stats.record("events", 5000);
        stats.record("events", 2000);

        assert_eq!(observer.get("events"), 7000);
        assert_eq!(
            observer.non_zero().into_iter().collect::<Vec<_>>(),
            vec![("events".to_string(), 7000)]
        );
        assert_eq!(observer.snapshot().len(), 2);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let stats = DeletionStats::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record("events", 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.get("events"), 8000);
    }
}
