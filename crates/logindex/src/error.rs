use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A build for this source is already in flight.
    #[error("already building an index for {}", source_path.display())]
    AlreadyBuilding {
        /// The contested source path.
        source_path: PathBuf,
    },

    /// An index build aborted; the job carries the detail.
    #[error("index build failed: {0}")]
    Build(#[from] crate::txlog::TxlogError),

    /// The named query handle does not exist (never created, released, or
    /// expired).
    #[error("query handle {id} not found")]
    HandleNotFound {
        /// The handle id.
        id: String,
    },

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// Row (de)serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The named index does not exist or is marked for deletion.
    #[error("index {name} not found")]
    NotFound {
        /// The index name.
        name: String,
    },
}
