//! Retention policy configuration.
//!
//! Describes which documents are eligible for deletion.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! collection = "events"
//! age_field = "created_at"
//! days_to_keep = 90
//! filter = '{"status": "inactive"}'
//! ```

use serde::{Deserialize, Serialize};

/// Retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Collection to purge. When omitted, every collection in the database is processed.
    #[serde(default)]
    pub collection: Option<String>,

    /// Document field holding the record's age. Used both to select
    /// documents older than the cutoff and to order deletion oldest first.
    /// Default: "timestamp"
    #[serde(default = "default_age_field")]
    pub age_field: String,

    /// Number of days of data to keep. Anything older is deleted.
    /// Default: 30
    #[serde(default = "default_days_to_keep")]
    pub days_to_keep: u32,

    /// Extra filter in MongoDB Extended JSON, ANDed with the age predicate.
    /// Default: empty (no extra filter)
    #[serde(default)]
    pub filter: String,

    /// Include server-managed `system.*` collections when processing all
    /// collections. Has no effect when `collection` is set.
    /// Default: false
    #[serde(default)]
    pub include_system_collections: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            collection: None,
            age_field: default_age_field(),
            days_to_keep: default_days_to_keep(),
            filter: String::new(),
            include_system_collections: false,
        }
    }
}

fn default_age_field() -> String {
    "timestamp".to_string()
}

fn default_days_to_keep() -> u32 {
    30
}

impl RetentionConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.age_field.trim().is_empty() {
            return Err("retention.age_field must not be empty".into());
        }
        if self.age_field.starts_with('$') {
            return Err(format!(
                "retention.age_field '{}' must be a field name, not an operator",
                self.age_field
            ));
        }
        if let Some(collection) = &self.collection
            && collection.is_empty()
        {
            return Err("retention.collection must not be empty when set".into());
        }
        Ok(())
    }
}
