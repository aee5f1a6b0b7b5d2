//! Secrets manager configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the secrets manager.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecretsConfig {
    /// No secrets manager (`secret-ref:` passwords cannot be resolved)
    #[default]
    None,

    /// Environment variable-based secrets
    /// Keys are looked up directly as environment variable names.
    Env,

    /// HashiCorp Vault / OpenBao secrets manager. Requires the `vault` feature.
    #[cfg(feature = "vault")]
    Vault(VaultSecretsConfig),
}

#[cfg(feature = "vault")]
/// Configuration for Vault/OpenBao secrets manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSecretsConfig {
    /// Vault server address (e.g., "https://vault.example.com:8200")
    pub address: String,

    /// Authentication method
    #[serde(flatten)]
    pub auth: VaultAuth,

    /// KV v2 mount point (default: "secret")
    #[serde(default = "default_vault_mount")]
    pub mount: String,

    /// Path prefix for all secrets (default: "mongo-purge")
    #[serde(default = "default_vault_path_prefix")]
    pub path_prefix: String,
}

#[cfg(feature = "vault")]
fn default_vault_mount() -> String {
    "secret".to_string()
}

#[cfg(feature = "vault")]
fn default_vault_path_prefix() -> String {
    "mongo-purge".to_string()
}

#[cfg(feature = "vault")]
/// Vault authentication methods.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "auth", rename_all = "snake_case")]
pub enum VaultAuth {
    /// Token-based authentication
    Token {
        /// The Vault token
        token: String,
    },

    /// AppRole authentication (recommended for unattended jobs)
    AppRole {
        /// AppRole role ID
        role_id: String,
        /// AppRole secret ID
        secret_id: String,
        /// Auth mount path (default: "approle")
        #[serde(default = "default_approle_mount")]
        auth_mount: String,
    },

    /// Kubernetes authentication (for CronJobs running in k8s)
    Kubernetes {
        /// Vault role name
        role: String,
        /// Path to the service account token (default: /var/run/secrets/kubernetes.io/serviceaccount/token)
        #[serde(default = "default_k8s_token_path")]
        token_path: String,
        /// Auth mount path (default: "kubernetes")
        #[serde(default = "default_k8s_mount")]
        auth_mount: String,
    },
}

#[cfg(feature = "vault")]
impl std::fmt::Debug for VaultAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultAuth::Token { .. } => f.debug_struct("Token").field("token", &"****").finish(),
            VaultAuth::AppRole {
                role_id,
                auth_mount,
                ..
            } => f
                .debug_struct("AppRole")
                .field("role_id", role_id)
                .field("secret_id", &"****")
                .field("auth_mount", auth_mount)
                .finish(),
            VaultAuth::Kubernetes {
                role,
                token_path,
                auth_mount,
            } => f
                .debug_struct("Kubernetes")
                .field("role", role)
                .field("token_path", token_path)
                .field("auth_mount", auth_mount)
                .finish(),
        }
    }
}

#[cfg(feature = "vault")]
fn default_approle_mount() -> String {
    "approle".to_string()
}

#[cfg(feature = "vault")]
fn default_k8s_mount() -> String {
    "kubernetes".to_string()
}

#[cfg(feature = "vault")]
fn default_k8s_token_path() -> String {
    "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string()
}
