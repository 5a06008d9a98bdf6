use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Platform-wide error classification.
///
/// Every subsystem error maps onto one of these so callers (HTTP layer,
/// job runner, audit) can react without matching on crate-specific enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Passed data failed validation.
    ValidationError,
    /// The request is missing a required parameter or is otherwise malformed.
    InvalidRequest,
    /// Record not found.
    NotFound,
    /// Internal error: unregistered job type, broken static configuration
    /// or an environment fault.
    SystemError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SystemError => "system_error",
        }
    }

    /// HTTP status code used when the error reaches an HTTP client.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::ValidationError | ErrorKind::InvalidRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::SystemError => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum KonaError {
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, KonaError>;
