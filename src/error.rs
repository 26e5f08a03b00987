// Error types for the session registry and the exclusivity coordinator

use crate::session::types::CoordinatorState;
use thiserror::Error;

/// Errors returned by a session registry backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The store could not be reached or refused the operation
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    /// A path or path segment is not addressable
    #[error("invalid registry path: {0}")]
    InvalidPath(String),
    /// A stored value could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Serialization(err.to_string())
    }
}

/// Errors surfaced by coordinator operations
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Caller supplied an unusable argument (e.g. an empty user id)
    #[error("validation error: {0}")]
    Validation(String),
    /// Any registry operation failed
    #[error("session registry unavailable: {0}")]
    RegistryUnavailable(#[from] RegistryError),
    /// The UI notifier was missing or failed
    #[error("notification failed: {0}")]
    NotificationFailure(String),
    /// The auth system's logout failed
    #[error("logout failed: {0}")]
    LogoutFailure(String),
    /// Operation is not permitted from the coordinator's current state
    #[error("operation not permitted in state {0}")]
    InvalidState(CoordinatorState),
}

pub type SessionResult<T> = Result<T, SessionError>;
