use kona_core::error::ErrorKind;
use kona_store::StoreError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A job or run-spec failed validation; nothing was persisted.
    #[error("{0}")]
    Validation(String),

    /// A handler was invoked with unusable input (e.g. missing params).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// Unregistered job type, broken handler contract or similar fault.
    #[error("System error: {0}")]
    System(String),

    /// Static scheduler configuration could not be applied.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Underlying document store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored job record could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::Validation(_) => ErrorKind::ValidationError,
            SchedulerError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            SchedulerError::JobNotFound { .. } => ErrorKind::NotFound,
            SchedulerError::System(_) | SchedulerError::Config(_) | SchedulerError::Serialization(_) => {
                ErrorKind::SystemError
            }
            SchedulerError::Store(e) => e.kind(),
        }
    }

    /// Short error code (`validation_error`, `not_found`, ...).
    pub fn code(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
