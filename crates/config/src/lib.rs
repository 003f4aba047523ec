//! Configuration model and durable, versioned configuration storage for a
//! ZooKeeper ensemble.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod servers;
mod store;

pub use error::Error;
pub use servers::{ServerList, ServerSpec};
pub use store::{ConfigPersistence, ConfigStore, FsConfigPersistence, MemoryConfigPersistence};

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Immutable configuration snapshot for one ensemble member.
///
/// All durations are carried as plain milliseconds to match the wire format
/// consumed by the admin console.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnsembleConfig {
    /// Directory the ZooKeeper distribution is installed under.
    pub install_dir: String,

    /// ZooKeeper data directory (snapshots, transaction logs, `myid`).
    pub data_dir: String,

    /// Directory transaction-log indexes are built into.
    pub log_index_dir: String,

    /// Ensemble specification: `"<hostname>:<serverId>,..."`.
    pub servers_spec: String,

    /// Hostname of the member this process supervises. Must appear in
    /// `servers_spec` for the member to be considered in service.
    pub hostname: String,

    /// Port clients connect to.
    pub client_port: u16,

    /// Port members use to connect to the quorum leader.
    pub connect_port: u16,

    /// Port members use for leader election.
    pub election_port: u16,

    /// Liveness check period.
    pub check_ms: u64,

    /// Transaction-log cleanup period.
    pub cleanup_period_ms: u64,

    /// Number of transaction logs the cleanup task retains.
    pub cleanup_max_files: u32,

    /// Backup pipeline period.
    pub backup_period_ms: u64,

    /// Maximum age of a retained backup.
    pub backup_max_store_ms: u64,

    /// Timeout for connections to the supervised ZooKeeper instance.
    pub connection_timeout_ms: u64,

    /// Extra `zoo.cfg` properties, passed through verbatim.
    pub zoo_cfg_extra: BTreeMap<String, String>,

    /// Opaque settings for the active backup provider.
    pub backup_extra: BTreeMap<String, String>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            install_dir: String::new(),
            data_dir: String::new(),
            log_index_dir: String::new(),
            servers_spec: String::new(),
            hostname: "localhost".to_string(),
            client_port: 2181,
            connect_port: 2888,
            election_port: 3888,
            check_ms: 30_000,
            cleanup_period_ms: Duration::from_secs(12 * 60 * 60).as_millis() as u64,
            cleanup_max_files: 3,
            backup_period_ms: 60_000,
            backup_max_store_ms: Duration::from_secs(24 * 60 * 60).as_millis() as u64,
            connection_timeout_ms: 10_000,
            zoo_cfg_extra: BTreeMap::new(),
            backup_extra: BTreeMap::new(),
        }
    }
}

impl EnsembleConfig {
    /// Validates every field, returning the first offense.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), Error> {
        fn require_dir(field: &'static str, value: &str) -> Result<(), Error> {
            if value.trim().is_empty() {
                return Err(Error::validation(field, "directory must not be empty"));
            }
            Ok(())
        }

        require_dir("installDir", &self.install_dir)?;
        require_dir("dataDir", &self.data_dir)?;
        require_dir("logIndexDir", &self.log_index_dir)?;

        if self.hostname.trim().is_empty() {
            return Err(Error::validation("hostname", "hostname must not be empty"));
        }

        for (field, port) in [
            ("clientPort", self.client_port),
            ("connectPort", self.connect_port),
            ("electionPort", self.election_port),
        ] {
            if port == 0 {
                return Err(Error::validation(field, "port must be in 1..=65535"));
            }
        }
        if self.client_port == self.connect_port
            || self.client_port == self.election_port
            || self.connect_port == self.election_port
        {
            return Err(Error::validation("clientPort", "ports must be distinct"));
        }

        for (field, value) in [
            ("checkMs", self.check_ms),
            ("cleanupPeriodMs", self.cleanup_period_ms),
            ("backupPeriodMs", self.backup_period_ms),
            ("backupMaxStoreMs", self.backup_max_store_ms),
            ("connectionTimeoutMs", self.connection_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::validation(field, "period must be positive"));
            }
        }

        self.server_list().map(|_| ())
    }

    /// Parses `servers_spec` into an ordered server list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the specification is malformed.
    pub fn server_list(&self) -> Result<ServerList, Error> {
        ServerList::parse(&self.servers_spec)
    }

    /// This member's server id, `None` when unlisted.
    #[must_use]
    pub fn server_id(&self) -> Option<u32> {
        ServerList::parse(&self.servers_spec)
            .ok()
            .and_then(|list| list.server_id_for(&self.hostname))
    }

    /// Liveness check period as a [`Duration`].
    #[must_use]
    pub const fn check_period(&self) -> Duration {
        Duration::from_millis(self.check_ms)
    }

    /// Connection timeout as a [`Duration`].
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// True when moving from `old` to `new` touches a field that affects the
/// ensemble as a whole and therefore requires a staged (or explicitly
/// confirmed atomic) rollout: install/data directories, the server
/// specification, any of the three ports, or any `zoo.cfg` passthrough
/// property. Everything else is member-local and safe to apply immediately.
#[must_use]
pub fn ensemble_level_change(old: &EnsembleConfig, new: &EnsembleConfig) -> bool {
    old.install_dir != new.install_dir
        || old.data_dir != new.data_dir
        || old.servers_spec != new.servers_spec
        || old.client_port != new.client_port
        || old.connect_port != new.connect_port
        || old.election_port != new.election_port
        || old.zoo_cfg_extra != new.zoo_cfg_extra
}

/// A configuration together with the monotonically increasing version the
/// store assigned to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedConfig {
    /// Version assigned at write time; strictly increasing.
    pub version: u64,
    /// The configuration itself.
    pub config: EnsembleConfig,
}
