use kona_core::error::ErrorKind;
use thiserror::Error;

/// Errors raised by the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No (live) record matched the id or criteria.
    #[error("object in {collection} not found")]
    NotFound { collection: String },

    /// Caller passed data the store cannot accept.
    #[error("validation error: {0}")]
    Validation(String),

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored document could not be (de)serialised.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(collection: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Validation(_) => ErrorKind::ValidationError,
            StoreError::Database(_) | StoreError::Serialization(_) => ErrorKind::SystemError,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
