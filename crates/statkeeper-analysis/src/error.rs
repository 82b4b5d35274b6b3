//! Error types for the analysis scheduler.

use std::sync::PoisonError;

use statkeeper_core::JobId;

/// The result type used throughout statkeeper-analysis.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The analyze request is structurally invalid (unknown table or column,
    /// bad property value).
    #[error("data definition error: {message}")]
    DataDefinition {
        /// Description of what is wrong with the request.
        message: String,
    },

    /// The statistics backend cannot accept results right now.
    #[error("statistics backend unavailable, make sure the cluster is healthy")]
    BackendUnavailable,

    /// A job was not found.
    #[error("analysis job not found: {job_id}")]
    JobNotFound {
        /// The job ID that was not found.
        job_id: JobId,
    },

    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// Writing a durable log record failed.
    #[error("persistence error: {message}")]
    Persistence {
        /// Description of the persistence failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A log record could not be replayed. Fatal to the replay stream.
    #[error("replay error: {message}")]
    Replay {
        /// Description of the corrupt record.
        message: String,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },

    /// An error from statkeeper-core.
    #[error("core error: {0}")]
    Core(#[from] statkeeper_core::Error),
}

impl Error {
    /// Creates a new data definition error.
    #[must_use]
    pub fn data_definition(message: impl Into<String>) -> Self {
        Self::DataDefinition {
            message: message.into(),
        }
    }

    /// Creates a new persistence error.
    #[must_use]
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new persistence error with a source.
    #[must_use]
    pub fn persistence_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Persistence {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new replay error.
    #[must_use]
    pub fn replay(message: impl Into<String>) -> Self {
        Self::Replay {
            message: message.into(),
        }
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Converts a lock poison error to an internal error.
pub(crate) fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::internal("lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn data_definition_display() {
        let err = Error::data_definition("unknown column 'c9'");
        assert_eq!(err.to_string(), "data definition error: unknown column 'c9'");
    }

    #[test]
    fn state_transition_error_display() {
        let err = Error::InvalidStateTransition {
            from: "FINISHED".into(),
            to: "RUNNING".into(),
            reason: "terminal states are final".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("FINISHED"));
        assert!(msg.contains("RUNNING"));
    }

    #[test]
    fn persistence_error_has_source() {
        let err = Error::persistence_with_source("append job record", std::io::Error::other("eio"));
        assert!(err.source().is_some());
    }

    #[test]
    fn core_error_converts() {
        let core = statkeeper_core::Error::InvalidInput("bad".into());
        let err: Error = core.into();
        assert!(matches!(err, Error::Core(_)));
    }
}
