//! Error types for the supervisor and journal domain.

/// The result type used throughout tessera-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in supervisor and journal operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A worker with the same id is already registered.
    #[error("duplicate worker: {id}")]
    DuplicateWorker {
        /// The colliding worker id.
        id: String,
    },

    /// `run` was called on a worker that has already been started.
    #[error("worker already started: {id}")]
    WorkerAlreadyStarted {
        /// The worker id.
        id: String,
    },

    /// An event was sent to a worker whose queue is closed.
    #[error("worker stopped: {id}")]
    WorkerStopped {
        /// The worker id.
        id: String,
    },

    /// A journal identifier could not be parsed.
    #[error("invalid journal id [{id}]: {reason}")]
    InvalidJournalId {
        /// The rejected identifier.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A journal page does not exist.
    #[error("journal page not found: {id}")]
    PageNotFound {
        /// The page identifier.
        id: String,
    },

    /// Storage returned more than one record for one page identifier.
    #[error("journal page [{id}] has {count} records, expected 1")]
    PageConflict {
        /// The page identifier.
        id: String,
        /// How many records were returned.
        count: usize,
    },

    /// A journal processor failed on an entry.
    #[error("journal process [{process}] failed: {message}")]
    Processor {
        /// Processor name.
        process: String,
        /// Description of the failure.
        message: String,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Runtime configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An error from tessera-core.
    #[error("core error: {0}")]
    Core(#[from] tessera_core::error::Error),
}

impl Error {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new processor error.
    #[must_use]
    pub fn processor(process: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Processor {
            process: process.into(),
            message: message.into(),
        }
    }

    /// Creates a new invalid journal id error.
    #[must_use]
    pub fn invalid_journal_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidJournalId {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
