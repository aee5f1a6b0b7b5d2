//! HashiCorp Vault / OpenBao secret manager implementation.
//!
//! Reads credentials from the KV v2 secrets engine.
//! Supports multiple authentication methods: Token, AppRole, and Kubernetes.

use async_trait::async_trait;
use vaultrs::{
    auth::{approle, kubernetes},
    client::{Client, VaultClient, VaultClientSettingsBuilder},
    kv2,
};

use super::{SecretError, SecretManager, SecretResult};
use crate::config::{VaultAuth, VaultSecretsConfig};

/// Authentication method for Vault.
#[derive(Debug, Clone)]
pub enum VaultAuthMethod {
    /// Direct token authentication.
    Token(String),
    /// AppRole authentication.
    AppRole {
        /// The mount path for AppRole auth (default: "approle")
        mount: String,
        /// AppRole role ID
        role_id: String,
        /// AppRole secret ID
        secret_id: String,
    },
    /// Kubernetes ServiceAccount authentication.
    Kubernetes {
        /// The mount path for Kubernetes auth (default: "kubernetes")
        mount: String,
        /// Vault role name configured for this ServiceAccount
        role: String,
        /// JWT token from the ServiceAccount
        jwt: String,
    },
}

/// Configuration for the Vault secret manager.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Vault server address (e.g., "https://vault.example.com:8200")
    pub address: String,
    /// Authentication method
    pub auth: VaultAuthMethod,
    /// KV v2 mount point (default: "secret")
    pub mount: String,
    /// Path prefix for all secrets (e.g., "mongo-purge")
    pub path_prefix: String,
}

impl VaultConfig {
    /// Build from the `[secrets]` section of the config file.
    ///
    /// Kubernetes auth reads the ServiceAccount token from disk here.
    pub fn from_settings(settings: &VaultSecretsConfig) -> SecretResult<Self> {
        let auth = match &settings.auth {
            VaultAuth::Token { token } => VaultAuthMethod::Token(token.clone()),
            VaultAuth::AppRole {
                role_id,
                secret_id,
                auth_mount,
            } => VaultAuthMethod::AppRole {
                mount: auth_mount.clone(),
                role_id: role_id.clone(),
                secret_id: secret_id.clone(),
            },
            VaultAuth::Kubernetes {
                role,
                token_path,
                auth_mount,
            } => {
                let jwt = std::fs::read_to_string(token_path).map_err(|e| {
                    SecretError::Auth(format!(
                        "Failed to read Kubernetes service account token from {}: {}",
                        token_path, e
                    ))
                })?;
                VaultAuthMethod::Kubernetes {
                    mount: auth_mount.clone(),
                    role: role.clone(),
                    jwt: jwt.trim().to_string(),
                }
            }
        };

        Ok(Self {
            address: settings.address.clone(),
            auth,
            mount: settings.mount.clone(),
            path_prefix: settings.path_prefix.clone(),
        })
    }
}

/// Vault/OpenBao secret manager using the KV v2 secrets engine.
pub struct VaultSecretManager {
    client: VaultClient,
    mount: String,
    path_prefix: String,
}

impl VaultSecretManager {
    /// Create a new Vault secret manager with the given configuration.
    ///
    /// For AppRole and Kubernetes auth, this will perform the login
    /// and obtain a token before returning.
    pub async fn new(config: VaultConfig) -> SecretResult<Self> {
        let (initial_token, needs_auth) = match &config.auth {
            VaultAuthMethod::Token(token) => (token.clone(), false),
            VaultAuthMethod::AppRole { .. } | VaultAuthMethod::Kubernetes { .. } => {
                (String::new(), true)
            }
        };

        let settings = VaultClientSettingsBuilder::default()
            .address(&config.address)
            .token(&initial_token)
            .build()
            .map_err(|e| SecretError::Internal(format!("Failed to build Vault settings: {}", e)))?;

        let mut client = VaultClient::new(settings).map_err(|e| {
            SecretError::Connection(format!("Failed to create Vault client: {}", e))
        })?;

        if needs_auth {
            let token = match &config.auth {
                VaultAuthMethod::Token(token) => token.clone(),
                VaultAuthMethod::AppRole {
                    mount,
                    role_id,
                    secret_id,
                } => {
                    tracing::debug!(mount = %mount, "Authenticating to Vault via AppRole");
                    let auth_info = approle::login(&client, mount, role_id, secret_id)
                        .await
                        .map_err(|e| {
                            SecretError::Auth(format!("AppRole authentication failed: {}", e))
                        })?;
                    auth_info.client_token
                }
                VaultAuthMethod::Kubernetes { mount, role, jwt } => {
                    tracing::debug!(mount = %mount, role = %role, "Authenticating to Vault via Kubernetes");
                    let auth_info = kubernetes::login(&client, mount, role, jwt)
                        .await
                        .map_err(|e| {
                            SecretError::Auth(format!("Kubernetes authentication failed: {}", e))
                        })?;
                    auth_info.client_token
                }
            };

            client.set_token(&token);
            tracing::info!("Successfully authenticated to Vault");
        }

        Ok(Self {
            client,
            mount: config.mount,
            path_prefix: config.path_prefix,
        })
    }

    /// Build the full path for a secret key.
    fn full_path(&self, key: &str) -> String {
        if self.path_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.path_prefix, key)
        }
    }
}

#[async_trait]
impl SecretManager for VaultSecretManager {
    async fn get(&self, key: &str) -> SecretResult<Option<String>> {
        let path = self.full_path(key);

        match kv2::read::<serde_json::Value>(&self.client, &self.mount, &path).await {
            // A secret stores the credential under "value", or "password" for
            // secrets shared with other database tooling.
            Ok(secret) => Ok(secret
                .get("value")
                .or_else(|| secret.get("password"))
                .and_then(|v| v.as_str())
                .map(str::to_string)),
            Err(vaultrs::error::ClientError::APIError { code: 404, .. }) => Ok(None),
            Err(vaultrs::error::ClientError::APIError { code: 403, .. }) => Err(SecretError::Auth(
                format!("Permission denied reading secret '{}'", key),
            )),
            Err(e) => Err(SecretError::Internal(format!(
                "Failed to read secret '{}': {}",
                key, e
            ))),
        }
    }

}
