//! Secrets management for database credentials.
//!
//! A connection password may be written as `secret-ref:<name>`; the name is
//! looked up in the configured backend before any connection is attempted.
//!
//! Supports multiple backends:
//! - Environment variables
//! - In-memory (for testing)
//! - HashiCorp Vault / OpenBao - requires `vault` feature

#[cfg(feature = "vault")]
mod vault;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
#[cfg(feature = "vault")]
pub use vault::{VaultConfig, VaultSecretManager};

use crate::config::SecretsConfig;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Secret is empty: {0}")]
    Empty(String),

    #[error("Password references secret '{0}' but no secrets backend is configured")]
    NoBackend(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type SecretResult<T> = Result<T, SecretError>;

/// Trait for reading secrets from an external store.
#[async_trait]
pub trait SecretManager: Send + Sync {
    /// Get a secret by key. Returns None if not found.
    async fn get(&self, key: &str) -> SecretResult<Option<String>>;
}

/// In-memory secret manager (for testing only)
pub struct MemorySecretManager {
    secrets: dashmap::DashMap<String, String>,
}

impl MemorySecretManager {
    pub fn new() -> Self {
        Self {
            secrets: dashmap::DashMap::new(),
        }
    }

    pub fn with_secret(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }
}

impl Default for MemorySecretManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretManager for MemorySecretManager {
    async fn get(&self, key: &str) -> SecretResult<Option<String>> {
        Ok(self.secrets.get(key).map(|v| v.value().clone()))
    }
}

/// Environment-based secret manager (reads from env vars)
pub struct EnvSecretManager;

impl EnvSecretManager {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnvSecretManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretManager for EnvSecretManager {
    async fn get(&self, key: &str) -> SecretResult<Option<String>> {
        Ok(std::env::var(key).ok())
    }
}

/// Build the secret manager selected by configuration.
///
/// Returns `None` when no backend is configured.
pub async fn from_config(config: &SecretsConfig) -> SecretResult<Option<Arc<dyn SecretManager>>> {
    match config {
        SecretsConfig::None => Ok(None),
        SecretsConfig::Env => Ok(Some(Arc::new(EnvSecretManager::new()))),
        #[cfg(feature = "vault")]
        SecretsConfig::Vault(vault) => {
            let manager = VaultSecretManager::new(VaultConfig::from_settings(vault)?).await?;
            Ok(Some(Arc::new(manager)))
        }
    }
}

/// Look up `name` in `manager`, treating a missing or empty value as an error.
pub async fn resolve_secret(
    manager: Option<&dyn SecretManager>,
    name: &str,
) -> SecretResult<String> {
    let manager = manager.ok_or_else(|| SecretError::NoBackend(name.to_string()))?;

    match manager.get(name).await? {
        Some(value) if value.is_empty() => Err(SecretError::Empty(name.to_string())),
        Some(value) => {
            tracing::debug!(secret = name, "Resolved secret reference");
            Ok(value)
        }
        None => Err(SecretError::NotFound(name.to_string())),
    }
}
