//! Filter compilation.
//!
//! Combines the generated age predicate with an operator-supplied filter into
//! the single query document used for counting, fetching and nothing else:
//! deletes always go by identity.

use chrono::{DateTime, Utc};
use mongodb::bson::{self, Bson, Document, doc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Filter is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Filter is not valid Extended JSON: {0}")]
    ExtendedJson(String),

    #[error("Filter must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Parse filter text written in MongoDB Extended JSON.
///
/// Empty or whitespace-only text means no extra filter.
pub fn parse_filter(text: &str) -> Result<Document, FilterError> {
    if text.trim().is_empty() {
        return Ok(Document::new());
    }

    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = json_kind(&value);

    match Bson::try_from(value).map_err(|e| FilterError::ExtendedJson(e.to_string()))? {
        Bson::Document(document) => Ok(document),
        // `{"$date": ...}` at the top level parses as a value, not a filter
        _ => Err(FilterError::NotAnObject(kind)),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an Extended JSON value",
    }
}

/// What to delete from one collection: documents whose `age_field` is older
/// than `cutoff` and that also match `extra_filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionQuery {
    pub age_field: String,
    pub cutoff: DateTime<Utc>,
    pub extra_filter: Document,
}

impl RetentionQuery {
    pub fn new(age_field: impl Into<String>, cutoff: DateTime<Utc>, extra_filter: Document) -> Self {
        Self {
            age_field: age_field.into(),
            cutoff,
            extra_filter,
        }
    }

    /// The query document sent to the database.
    ///
    /// When the extra filter does not mention the age field its keys sit next
    /// to the age predicate. When it does, both are wrapped in `$and` so the
    /// cutoff is never overwritten.
    pub fn to_document(&self) -> Document {
        let mut age_predicate = Document::new();
        age_predicate.insert(
            self.age_field.clone(),
            doc! { "$lt": bson::DateTime::from_millis(self.cutoff.timestamp_millis()) },
        );

        if self.extra_filter.is_empty() {
            return age_predicate;
        }

        if self.extra_filter.contains_key(&self.age_field) {
            return doc! { "$and": [age_predicate, self.extra_filter.clone()] };
        }

        let mut combined = age_predicate;
        for (key, value) in &self.extra_filter {
            combined.insert(key.clone(), value.clone());
        }
        combined
    }
}
