//! Top-level failure taxonomy and process exit codes.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::{
    config::ConfigError, retention::FilterError, secrets::SecretError, store::StoreError,
};

/// Why a run ended without completing.
#[derive(Debug, Error)]
pub enum PurgeError {
    /// Invalid configuration. Nothing was contacted.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed filter text. Nothing was contacted.
    #[error("Invalid filter: {0}")]
    Filter(#[from] FilterError),

    /// The `secret-ref:` password could not be resolved. No connection was attempted.
    #[error("Failed to resolve secret: {0}")]
    Secret(#[from] SecretError),

    /// The database was unreachable or rejected the credentials.
    #[error("Connection error: {0}")]
    Connection(StoreError),

    /// A count, fetch or delete failed part way through.
    #[error("Operation failed on `{collection}`: {source}")]
    Operation {
        collection: String,
        #[source]
        source: StoreError,
    },

    /// Listing the database's collections failed.
    #[error("Failed to list collections: {0}")]
    ListCollections(StoreError),

    /// SIGINT or SIGTERM arrived before the run finished.
    #[error("Execution interrupted")]
    Interrupted,
}

impl PurgeError {
    pub fn exit_code(&self) -> u8 {
        match self {
            PurgeError::Config(_) | PurgeError::Filter(_) => 2,
            PurgeError::Secret(_) => 3,
            PurgeError::Connection(_) => 4,
            PurgeError::Operation { .. } | PurgeError::ListCollections(_) => 5,
            PurgeError::Interrupted => 130,
        }
    }

    /// Error kind for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PurgeError::Config(_) | PurgeError::Filter(_) => "configuration",
            PurgeError::Secret(_) => "secret_resolution",
            PurgeError::Connection(_) => "connection",
            PurgeError::Operation { .. } | PurgeError::ListCollections(_) => "operation",
            PurgeError::Interrupted => "interrupted",
        }
    }
}

/// A failed run together with whatever it deleted before failing.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: PurgeError,
    /// Per-collection deletions committed before the failure.
    pub deleted: BTreeMap<String, u64>,
}

impl RunFailure {
    pub fn exit_code(&self) -> u8 {
        self.error.exit_code()
    }
}
