use thiserror::Error;

use crate::member::MemberError;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration store rejected the write (validation or conflict).
    #[error(transparent)]
    Config(#[from] warden_config::Error),

    /// A member could not be reached.
    #[error(transparent)]
    Member(#[from] MemberError),

    /// Cancel was requested but no rollout is active.
    #[error("no rollout in progress")]
    NoActiveRollout,

    /// A rollout is already active; requests are rejected, not queued.
    #[error("a rollout is already in progress")]
    RolloutInProgress,
}
