use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Optimistic concurrency check failed; a concurrent writer won.
    #[error("version conflict: expected {expected}, stored {actual}")]
    Conflict {
        /// The version the caller based its update on.
        expected: u64,
        /// The version actually stored.
        actual: u64,
    },

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// Configuration (de)serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A configuration field failed validation.
    #[error("invalid field `{field}`: {reason}")]
    Validation {
        /// Name of the offending field, as it appears on the wire.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl Error {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}
