use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The server could not be reached or rejected the credentials.
    #[error("Failed to connect to {target}: {message}")]
    Connection { target: String, message: String },

    /// A failure that may succeed when the same operation is issued again
    /// (network errors, server selection timeouts, retryable write errors).
    #[error("Transient database error: {0}")]
    Transient(String),

    #[error("Database error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
