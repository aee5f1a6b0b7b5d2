//! Document storage seam.
//!
//! The deletion engine only ever talks to a [`DocumentStore`]. Production runs
//! use [`MongoStore`]; tests use the in-process [`MemoryStore`].

mod error;
mod memory;
mod mongo;

use std::sync::Arc;

use async_trait::async_trait;
pub use error::*;
pub use memory::*;
use mongodb::bson::{Bson, Document};
pub use mongo::*;

use crate::config::ConnectionConfig;

/// Operations the purge needs from a database.
///
/// Every call is scoped to a collection of the database the store was opened
/// against. Implementations must be safe to share between the run loop and
/// the interrupt path.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of every collection in the database, in server order.
    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    /// Number of documents in `collection` matching `filter`.
    async fn count(&self, collection: &str, filter: &Document) -> StoreResult<u64>;

    /// Identities of at most `limit` documents matching `filter`, ascending by
    /// `sort_field` and then by `_id`.
    async fn oldest_ids(
        &self,
        collection: &str,
        filter: &Document,
        sort_field: &str,
        limit: u32,
    ) -> StoreResult<Vec<Bson>>;

    /// Delete exactly the documents whose `_id` is in `ids`.
    ///
    /// Returns how many were actually removed, which may be fewer than
    /// `ids.len()` when another writer got there first.
    async fn delete_ids(&self, collection: &str, ids: &[Bson]) -> StoreResult<u64>;

    /// Release the underlying connection. Called once on every exit path.
    async fn close(&self);
}

/// Opens a [`DocumentStore`] from connection settings.
///
/// The runner holds a connector rather than a store so that nothing touches
/// the network until configuration and secrets have been resolved.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// `password` has already been resolved from any `secret-ref:`.
    async fn connect(
        &self,
        config: &ConnectionConfig,
        password: Option<String>,
    ) -> StoreResult<Arc<dyn DocumentStore>>;
}

/// Connects to a real MongoDB deployment.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn connect(
        &self,
        config: &ConnectionConfig,
        password: Option<String>,
    ) -> StoreResult<Arc<dyn DocumentStore>> {
        let store = MongoStore::connect(config, password).await?;
        Ok(Arc::new(store))
    }
}
