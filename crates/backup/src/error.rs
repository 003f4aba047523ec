use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Index engine operation failed.
    #[error(transparent)]
    Index(#[from] warden_logindex::Error),

    /// The backing object store failed.
    #[error("store error: {0}")]
    Store(String),
}
