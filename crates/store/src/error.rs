//! Storage error types.

use thiserror::Error;

/// Errors that can occur in a storage adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Database error from the PostgreSQL adapter.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Backend failure (connection loss, injected test failure, ...).
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates a not-found error for the given entity and ID.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a backend error with the given message.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Convenience type alias for storage results.
pub type Result<T> = std::result::Result<T, StoreError>;
