//! Core error types for LeadSync.
//!
//! Remote failures are carried as [`RemoteError`] (`{code, message}`), the
//! shape every backend reports. Concrete clients convert their transport
//! errors into it at the trait boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::UNIQUE_VIOLATION_CODE;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the sync engine and its user-facing operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("An audience named '{0}' already exists")]
    DuplicateName(String),

    #[error("Failed to add leads: {0}")]
    Insert(String),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("No authenticated owner")]
    Unauthenticated,

    #[error("Session for this owner has been closed")]
    SessionClosed,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Error reported by the remote store or change stream.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// True when the store rejected a write on a unique constraint.
    pub fn is_unique_violation(&self) -> bool {
        self.code == UNIQUE_VIOLATION_CODE
    }
}

/// Snapshot fetch failures.
///
/// `Transient` describes a single failed attempt and never leaves the
/// loader; callers only ever observe `Terminal`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Snapshot attempt {attempt} failed: {source}")]
    Transient { attempt: u32, source: RemoteError },

    #[error("Failed to load leads data after {attempts} attempts: {last}")]
    Terminal { attempts: u32, last: RemoteError },
}

/// Validation errors for user input and inbound payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field '{0}' is missing")]
    MissingField(String),

    #[error("'{field}' must be at most {max} characters")]
    TooLong { field: String, max: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::InvalidInput(err.to_string())
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}
