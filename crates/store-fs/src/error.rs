use thiserror::Error;
use warden_store::StoreError;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The key escapes the store root (`..` or absolute component).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),
}

impl StoreError for Error {}
