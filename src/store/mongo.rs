//! MongoDB-backed store.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    Client, Collection, Database,
    bson::{Bson, Document, doc},
    error::{Error as MongoError, ErrorKind, RETRYABLE_WRITE_ERROR},
    options::{ClientOptions, Credential},
};

use super::{DocumentStore, StoreError, StoreResult};
use crate::config::ConnectionConfig;

/// A connection to one database on a MongoDB deployment.
pub struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    /// Connect and ping the server.
    ///
    /// The driver connects lazily, so without the ping an unreachable server
    /// or rejected credentials would only surface on the first count.
    /// `password` is the resolved password, never a `secret-ref:`.
    pub async fn connect(config: &ConnectionConfig, password: Option<String>) -> StoreResult<Self> {
        let target = config.redacted_uri();
        let connection_error = |e: MongoError| StoreError::Connection {
            target: target.clone(),
            message: e.to_string(),
        };

        let uri = config.uri.as_deref().unwrap_or_default();
        let database_name = config.database.as_deref().unwrap_or_default();

        let mut options = ClientOptions::parse(uri).await.map_err(connection_error)?;
        options.app_name = Some(config.app_name.clone());
        options.connect_timeout = Some(config.connect_timeout());
        options.server_selection_timeout = Some(config.connect_timeout());

        if let Some(username) = &config.username {
            options.credential = Some(
                Credential::builder()
                    .username(username.clone())
                    .password(password)
                    .source(config.auth_database.clone())
                    .build(),
            );
        }

        let client = Client::with_options(options).map_err(connection_error)?;
        let database = client.database(database_name);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(connection_error)?;

        tracing::info!(
            uri = %target,
            database = database_name,
            authenticated = config.username.is_some(),
            "Connected to MongoDB"
        );

        Ok(Self { client, database })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }
}

/// Classify a driver error as transient or permanent.
fn classify(error: MongoError) -> StoreError {
    let transient = matches!(
        error.kind.as_ref(),
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. }
    ) || error.contains_label(RETRYABLE_WRITE_ERROR);

    if transient {
        StoreError::Transient(error.to_string())
    } else {
        StoreError::Backend(error.to_string())
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        self.database.list_collection_names().await.map_err(classify)
    }

    async fn count(&self, collection: &str, filter: &Document) -> StoreResult<u64> {
        self.collection(collection)
            .count_documents(filter.clone())
            .await
            .map_err(classify)
    }

    async fn oldest_ids(
        &self,
        collection: &str,
        filter: &Document,
        sort_field: &str,
        limit: u32,
    ) -> StoreResult<Vec<Bson>> {
        let mut sort = Document::new();
        sort.insert(sort_field, 1);
        if sort_field != "_id" {
            sort.insert("_id", 1);
        }

        let documents: Vec<Document> = self
            .collection(collection)
            .find(filter.clone())
            .projection(doc! { "_id": 1 })
            .sort(sort)
            .limit(i64::from(limit))
            .await
            .map_err(classify)?
            .try_collect()
            .await
            .map_err(classify)?;

        Ok(documents
            .into_iter()
            .filter_map(|mut document| document.remove("_id"))
            .collect())
    }

    async fn delete_ids(&self, collection: &str, ids: &[Bson]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = self
            .collection(collection)
            .delete_many(doc! { "_id": { "$in": ids.to_vec() } })
            .await
            .map_err(classify)?;

        Ok(result.deleted_count)
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
        tracing::debug!("MongoDB client shut down");
    }
}
