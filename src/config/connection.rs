//! Database connection configuration.

use serde::{Deserialize, Serialize};

/// Prefix marking a password that must be fetched from the secrets backend.
pub const SECRET_REF_PREFIX: &str = "secret-ref:";

/// MongoDB connection settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Connection string, e.g. `mongodb://host:27017`.
    #[serde(default)]
    pub uri: Option<String>,

    /// Database holding the collections to purge.
    #[serde(default)]
    pub database: Option<String>,

    /// Username for authentication. Omit to connect without credentials.
    #[serde(default)]
    pub username: Option<String>,

    /// Password, or `secret-ref:<name>` to resolve it through the secrets backend.
    #[serde(default)]
    pub password: Option<String>,

    /// Database the credentials are defined in.
    /// Default: "admin"
    #[serde(default = "default_auth_database")]
    pub auth_database: String,

    /// How long to wait for a reachable server before giving up.
    /// Default: 30
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Application name reported to the server (visible in `currentOp`).
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: None,
            database: None,
            username: None,
            password: None,
            auth_database: default_auth_database(),
            connect_timeout_secs: default_connect_timeout_secs(),
            app_name: default_app_name(),
        }
    }
}

fn default_auth_database() -> String {
    "admin".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_app_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

impl ConnectionConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        match self.uri.as_deref() {
            None | Some("") => {
                return Err("connection.uri is required (--mongo-uri)".into());
            }
            Some(_) => {}
        }
        match self.database.as_deref() {
            None | Some("") => {
                return Err("connection.database is required (--db-name)".into());
            }
            Some(_) => {}
        }
        if self.password.is_some() && self.username.is_none() {
            return Err("connection.password is set but connection.username is not".into());
        }
        Ok(())
    }

    /// Name of the secret the password refers to, if it is a `secret-ref:`.
    pub fn password_secret_ref(&self) -> Option<&str> {
        self.password
            .as_deref()
            .and_then(|p| p.strip_prefix(SECRET_REF_PREFIX))
    }

    /// Connection string with any embedded credentials masked, for logging.
    pub fn redacted_uri(&self) -> String {
        self.uri.as_deref().map(redact_uri).unwrap_or_default()
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connect_timeout_secs)
    }
}

fn redact_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let authority_start = scheme_end + 3;
    let authority_end = uri[authority_start..]
        .find(|c: char| c == '/' || c == '?')
        .map_or(uri.len(), |i| authority_start + i);

    match uri[authority_start..authority_end].rfind('@') {
        Some(at) => format!(
            "{}****{}",
            &uri[..authority_start],
            &uri[authority_start + at..]
        ),
        None => uri.to_string(),
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let password = match &self.password {
            None => None,
            Some(p) if p.starts_with(SECRET_REF_PREFIX) => Some(p.as_str()),
            Some(_) => Some("****"),
        };
        f.debug_struct("ConnectionConfig")
            .field("uri", &self.redacted_uri())
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &password)
            .field("auth_database", &self.auth_database)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("app_name", &self.app_name)
            .finish()
    }
}
