//! Configuration for the purge tool.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then explicit command-line arguments. The file supports environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [connection]
//! uri = "mongodb://db.internal:27017"
//! database = "telemetry"
//! username = "purger"
//! password = "secret-ref:mongo-purger"
//!
//! [retention]
//! age_field = "created_at"
//! days_to_keep = 90
//! filter = '{"status": "inactive"}'
//!
//! [execution]
//! batch_size = 2000
//! sleep_secs = 1.0
//!
//! [secrets]
//! type = "env"
//! ```

mod connection;
mod execution;
mod observability;
mod retention;
mod secrets;

use std::path::{Path, PathBuf};

pub use connection::*;
pub use execution::*;
pub use observability::*;
pub use retention::*;
pub use secrets::*;
use serde::{Deserialize, Serialize};

/// Root configuration.
///
/// Every section is optional in the file; missing values fall back to the
/// built-in defaults. Connection URI and database name have no default and
/// must be supplied by the file or the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurgeConfig {
    /// Database connection and credentials.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// What to delete: target collection, age field, retention period and filter.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// How to delete: batch size, pacing, progress reporting, dry run.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Logging configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Secrets backend used to resolve `secret-ref:` passwords.
    #[serde(default)]
    pub secrets: SecretsConfig,
}

impl PurgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error. The result is not validated; call
    /// [`resolve`] once command-line overrides are known.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        toml::from_str(&expanded).map_err(ConfigError::Parse)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate().map_err(ConfigError::Validation)?;
        self.retention.validate().map_err(ConfigError::Validation)?;
        self.execution.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}

/// Values supplied explicitly on the command line.
///
/// Each `Some` field replaces whatever the file (or the defaults) provided.
/// `dry_run` is a switch: it can enable dry-run mode but never disable one
/// requested by the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub uri: Option<String>,
    pub database: Option<String>,
    pub collection: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth_database: Option<String>,
    pub age_field: Option<String>,
    pub days_to_keep: Option<u32>,
    pub filter: Option<String>,
    pub batch_size: Option<u32>,
    pub sleep_secs: Option<f64>,
    pub delete_rate: Option<u32>,
    pub progress_interval: Option<u64>,
    pub dry_run: bool,
    pub log_file: Option<PathBuf>,
    pub log_level: Option<LogLevel>,
    pub log_format: Option<LogFormat>,
}

impl ConfigOverrides {
    fn apply(self, config: &mut PurgeConfig) {
        let connection = &mut config.connection;
        replace(&mut connection.uri, self.uri.map(Some));
        replace(&mut connection.database, self.database.map(Some));
        replace(&mut connection.username, self.username.map(Some));
        replace(&mut connection.password, self.password.map(Some));
        replace(&mut connection.auth_database, self.auth_database);

        let retention = &mut config.retention;
        replace(&mut retention.collection, self.collection.map(Some));
        replace(&mut retention.age_field, self.age_field);
        replace(&mut retention.days_to_keep, self.days_to_keep);
        replace(&mut retention.filter, self.filter);

        let execution = &mut config.execution;
        replace(&mut execution.batch_size, self.batch_size);
        replace(&mut execution.sleep_secs, self.sleep_secs);
        replace(&mut execution.delete_rate, self.delete_rate);
        replace(&mut execution.progress_interval, self.progress_interval);
        execution.dry_run |= self.dry_run;

        let logging = &mut config.observability.logging;
        replace(&mut logging.file, self.log_file.map(Some));
        replace(&mut logging.level, self.log_level);
        replace(&mut logging.format, self.log_format);
    }
}

fn replace<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// Resolve the final configuration from the file layer and explicit arguments.
///
/// Applied once before any work starts, so nothing downstream needs to know
/// which source supplied a value. A missing file layer means built-in defaults.
pub fn resolve(
    file: Option<PurgeConfig>,
    overrides: ConfigOverrides,
) -> Result<PurgeConfig, ConfigError> {
    let mut config = file.unwrap_or_default();
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    static ENV_VAR: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
        regex::Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid")
    });

    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in ENV_VAR.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
