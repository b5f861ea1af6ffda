//! Error type for cloud api operations.
//!
//! Keeps transport details out of the stores: a store only needs to tell
//! "object is gone" apart from "request failed".

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// The referenced object does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The request conflicts with current state (e.g. address already bound).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The api answered with an error status.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never got an answer.
    #[error("transport error: {0}")]
    Transport(String),
}

impl CloudError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CloudError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    /// Transport failures and 5xx answers may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            CloudError::Transport(_) => true,
            CloudError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Shorthand result alias for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;
