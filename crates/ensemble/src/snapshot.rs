//! Control-panel switches and the aggregated system-state document.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use warden_config::VersionedConfig;
use warden_rollout::RollingState;

/// Operator-togglable behavior switches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchKind {
    /// Automatic instance restarts.
    Restarts,
    /// Periodic transaction-log cleanup.
    Cleanup,
    /// Restarts for hosts missing from the server list.
    UnlistedRestarts,
    /// The backup pipeline.
    Backups,
}

impl FromStr for SwitchKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").to_lowercase().as_str() {
            "restarts" => Ok(Self::Restarts),
            "cleanup" => Ok(Self::Cleanup),
            "unlisted_restarts" => Ok(Self::UnlistedRestarts),
            "backups" => Ok(Self::Backups),
            _ => Err(()),
        }
    }
}

/// Current switch values, as serialized into the state document.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchesView {
    /// Automatic restarts enabled.
    pub restarts: bool,
    /// Log cleanup enabled.
    pub cleanup: bool,
    /// Unlisted-host restarts enabled.
    pub unlisted_restarts: bool,
    /// Backups enabled.
    pub backups: bool,
}

/// Thread-safe switch storage; everything defaults to enabled.
#[derive(Debug)]
pub struct ControlPanel {
    restarts: AtomicBool,
    cleanup: AtomicBool,
    unlisted_restarts: AtomicBool,
    backups: AtomicBool,
}

impl Default for ControlPanel {
    fn default() -> Self {
        Self {
            restarts: AtomicBool::new(true),
            cleanup: AtomicBool::new(true),
            unlisted_restarts: AtomicBool::new(true),
            backups: AtomicBool::new(true),
        }
    }
}

impl ControlPanel {
    fn slot(&self, kind: SwitchKind) -> &AtomicBool {
        match kind {
            SwitchKind::Restarts => &self.restarts,
            SwitchKind::Cleanup => &self.cleanup,
            SwitchKind::UnlistedRestarts => &self.unlisted_restarts,
            SwitchKind::Backups => &self.backups,
        }
    }

    /// Reads a switch.
    pub fn is_enabled(&self, kind: SwitchKind) -> bool {
        self.slot(kind).load(Ordering::Relaxed)
    }

    /// Sets a switch.
    pub fn set(&self, kind: SwitchKind, value: bool) {
        self.slot(kind).store(value, Ordering::Relaxed);
    }

    /// Snapshot of all switches.
    pub fn view(&self) -> SwitchesView {
        SwitchesView {
            restarts: self.is_enabled(SwitchKind::Restarts),
            cleanup: self.is_enabled(SwitchKind::Cleanup),
            unlisted_restarts: self.is_enabled(SwitchKind::UnlistedRestarts),
            backups: self.is_enabled(SwitchKind::Backups),
        }
    }
}

/// Status of one ensemble member as seen from this process.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Member hostname.
    pub hostname: String,
    /// ZooKeeper server id.
    pub server_id: u32,
    /// State code (see [`crate::InstanceState::code`]).
    pub code: u8,
    /// State description.
    pub description: String,
    /// True when the member reported leader mode.
    pub is_leader: bool,
}

/// Read-optimized aggregate of everything status consumers need. Owned
/// exclusively by the controller; callers never mutate it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemState {
    /// Supervisor version.
    pub version: String,
    /// True when the local instance answers `ruok`.
    pub running: bool,
    /// True while the backup pipeline worker is active.
    pub backup_active: bool,
    /// Control-panel switches.
    pub switches: SwitchesView,
    /// Local instance state code.
    pub state: u8,
    /// Local instance state description.
    pub description: String,
    /// Current versioned configuration.
    pub config: VersionedConfig,
    /// This member's server id, `-1` when unlisted.
    pub server_id: i64,
    /// Rollout state.
    pub rolling: RollingState,
    /// Per-member connectivity, ascending server id.
    pub servers: Vec<ServerStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_names_parse_fuzzily() {
        assert_eq!("restarts".parse(), Ok(SwitchKind::Restarts));
        assert_eq!("unlisted-restarts".parse(), Ok(SwitchKind::UnlistedRestarts));
        assert_eq!("UNLISTED_RESTARTS".parse(), Ok(SwitchKind::UnlistedRestarts));
        assert!(SwitchKind::from_str("bogus").is_err());
    }

    #[test]
    fn switches_default_enabled_and_toggle() {
        let panel = ControlPanel::default();
        assert!(panel.is_enabled(SwitchKind::Restarts));

        panel.set(SwitchKind::Restarts, false);
        assert!(!panel.is_enabled(SwitchKind::Restarts));
        assert!(panel.view().cleanup);
        assert!(!panel.view().restarts);
    }
}
