use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use warden_config::{ServerSpec, VersionedConfig};

/// Errors raised by member operations.
#[derive(Debug, Error)]
pub enum MemberError {
    /// The member did not respond, or did not rejoin in time.
    #[error("member {hostname} unreachable: {reason}")]
    Unreachable {
        /// Hostname of the member.
        hostname: String,
        /// What went wrong.
        reason: String,
    },
}

impl MemberError {
    /// Convenience constructor.
    pub fn unreachable(hostname: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unreachable {
            hostname: hostname.into(),
            reason: reason.into(),
        }
    }
}

/// Operations the coordinator needs against individual ensemble members.
///
/// The production implementation talks to each member's admin endpoint; tests
/// substitute an in-memory double.
#[async_trait]
pub trait MemberClient: Send + Sync + 'static {
    /// Delivers a configuration to a member without restarting it.
    async fn push_config(
        &self,
        member: &ServerSpec,
        config: &VersionedConfig,
    ) -> Result<(), MemberError>;

    /// Asks a member to restart its ZooKeeper instance.
    async fn restart(&self, member: &ServerSpec) -> Result<(), MemberError>;

    /// Waits until the member is serving again, bounded by `timeout`.
    async fn await_rejoin(
        &self,
        member: &ServerSpec,
        timeout: Duration,
    ) -> Result<(), MemberError>;
}
