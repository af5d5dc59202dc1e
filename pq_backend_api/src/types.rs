/// Errors surfaced by repository and compressor backends.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Reference or object id does not name a commit.
    #[error("unknown reference '{reference}'")]
    UnknownReference {
        /// Reference as given by the caller.
        reference: String,
    },
    /// Operation is not supported by the backend.
    #[error("operation '{operation}' is not supported by this backend")]
    UnsupportedOperation {
        /// Name of the unsupported operation.
        operation: &'static str,
    },
    /// Generic failure surfaced by the backend.
    #[error("{message}")]
    Failure {
        /// Human-readable error message.
        message: String,
    },
}

impl BackendError {
    /// Helper to construct a failure from any displayable message.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    /// Helper for unknown references.
    #[must_use]
    pub fn unknown(reference: impl Into<String>) -> Self {
        Self::UnknownReference {
            reference: reference.into(),
        }
    }
}

/// Convenience result alias for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;
