//! Error types for the reporting engine.

use trama_core::TargetPath;

/// The result type used throughout trama-engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in engine operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A graph node was not found.
    #[error("graph node not found: {target}")]
    NodeNotFound {
        /// The target path that was looked up.
        target: TargetPath,
    },

    /// A configuration upload was rejected.
    ///
    /// Upload-time errors surface synchronously to the uploader; none of the
    /// upload's registry or ledger effects are retained.
    #[error("configuration rejected: {message}")]
    ConfigRejected {
        /// Why the upload was rejected.
        message: String,
    },

    /// A named expression referenced by configuration does not exist.
    #[error("named expression not found: {id}")]
    NamedExpressionNotFound {
        /// The missing named-expression ID.
        id: String,
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

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A scheduler tick failed inside its critical section.
    ///
    /// Tick errors are caught and logged by the tick runner; this variant
    /// exists so the failure can still be reported to observability hooks.
    #[error("scheduler tick failed: {message}")]
    TickFailed {
        /// Description of the tick failure.
        message: String,
    },

    /// An error from trama-core.
    #[error("core error: {0}")]
    Core(#[from] trama_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
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

    /// Creates a new configuration-rejection error.
    #[must_use]
    pub fn config_rejected(message: impl Into<String>) -> Self {
        Self::ConfigRejected {
            message: message.into(),
        }
    }
}
