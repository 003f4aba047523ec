use serde::{Deserialize, Serialize};
use warden_config::ServerList;

/// Lifecycle of a configuration rollout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    /// No rollout has run yet.
    Idle,
    /// A rolling rollout is walking the ensemble (possibly halted).
    RollingOut,
    /// A cancel is converging members to a terminal state.
    Committing,
    /// The last rollout finished with every member on the target config.
    Committed,
    /// The last rollout was reverted; no member is on the target config.
    RolledBack,
}

impl RolloutStatus {
    /// True while a rollout owns the coordinator and new requests must be
    /// rejected.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::RollingOut | Self::Committing)
    }
}

/// Apply progress of a single member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberApplyStatus {
    /// Not reached yet.
    Pending,
    /// Currently being pushed/restarted.
    Applying,
    /// On the target configuration.
    Done,
    /// Failed to apply; rollout halted here.
    Failed,
}

/// Per-member rollout progress.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProgress {
    /// ZooKeeper server id.
    pub server_id: u32,
    /// Member hostname.
    pub hostname: String,
    /// Apply status.
    pub status: MemberApplyStatus,
    /// Failure detail when `status` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of the ensemble-wide rollout state. One exists per ensemble.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingState {
    /// Current status.
    pub status: RolloutStatus,
    /// `floor(completed / total * 100)`.
    pub percent_done: u8,
    /// Version the rollout is converging the ensemble to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_version: Option<u64>,
    /// True when a member failure stopped progress and operator action
    /// (rollback or force-commit) is required.
    pub halted: bool,
    /// Human-readable progress line for status consumers.
    pub message: String,
    /// Per-member progress, ascending server id.
    pub members: Vec<MemberProgress>,
}

impl RollingState {
    pub(crate) fn idle() -> Self {
        Self {
            status: RolloutStatus::Idle,
            percent_done: 0,
            target_version: None,
            halted: false,
            message: "n/a".to_string(),
            members: Vec::new(),
        }
    }

    pub(crate) fn starting(target_version: u64, servers: &ServerList) -> Self {
        Self {
            status: RolloutStatus::RollingOut,
            percent_done: 0,
            target_version: Some(target_version),
            halted: false,
            message: format!("rolling out to {} members", servers.len()),
            members: servers
                .specs()
                .iter()
                .map(|s| MemberProgress {
                    server_id: s.server_id,
                    hostname: s.hostname.clone(),
                    status: MemberApplyStatus::Pending,
                    error: None,
                })
                .collect(),
        }
    }

    pub(crate) fn completed_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.status == MemberApplyStatus::Done)
            .count()
    }

    pub(crate) fn recompute_percent(&mut self) {
        let total = self.members.len();
        if total == 0 {
            self.percent_done = 0;
            return;
        }
        self.percent_done = (self.completed_count() * 100 / total) as u8;
    }

    pub(crate) fn member_mut(&mut self, hostname: &str) -> Option<&mut MemberProgress> {
        self.members.iter_mut().find(|m| m.hostname == hostname)
    }
}
