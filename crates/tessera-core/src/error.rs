//! Error types and result aliases for Tessera.
//!
//! This module defines the shared error types used by the lock primitives and
//! the record storage contract. Lock errors are typed so callers can decide
//! between retrying (`LockTimeout`), backing off (`LockConflict`) and
//! reporting a caller bug (`InvalidPath`).

use std::time::Duration;

/// The result type used throughout Tessera.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Tessera core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A bounded wait for a gate or key lock elapsed.
    #[error("failed to acquire lock after {timeout:?}")]
    LockTimeout {
        /// The wait bound that was exceeded.
        timeout: Duration,
    },

    /// A path lock overlaps a live lock owned by someone else.
    #[error("found lock [{handle}] conflicting with request")]
    LockConflict {
        /// Handle of the conflicting lock.
        handle: String,
    },

    /// A lock path does not name at least `{dataType}/{dataId}`.
    #[error("invalid path to lock [{path}], expected {{dataType}}/{{dataId}}[/{{subPath}}...]")]
    InvalidPath {
        /// The rejected path.
        path: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A record was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write collided with an existing record.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Returns true for errors a caller may resolve by retrying later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::LockConflict { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
