use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] warden_config::Error),

    /// HTTP request to a remote member failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// A four-letter word must be exactly four ASCII letters.
    #[error("invalid four letter word: {0}")]
    InvalidWord(String),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// The operation did not finish within its deadline.
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// The ZooKeeper wire protocol produced something undecodable.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// ZooKeeper answered a request with a non-zero error code.
    #[error("zookeeper error code {0}")]
    ZkReply(i32),
}
