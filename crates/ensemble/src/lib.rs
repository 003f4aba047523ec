//! Supervises the local ZooKeeper instance and aggregates ensemble-wide
//! state for status consumers.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod checker;
mod cleanup;
mod error;
mod fourletter;
mod process;
mod remote;
mod snapshot;
mod zk;

pub use checker::{InstanceState, Probe};
pub use error::Error;
pub use fourletter::four_letter;
pub use remote::RemoteMemberClient;
pub use snapshot::{ControlPanel, ServerStatus, SwitchKind, SwitchesView, SystemState};
pub use zk::{NodeData, Stat, ZkExplorer};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};
use warden_backup::BackupPipeline;
use warden_config::{ConfigStore, EnsembleConfig};
use warden_rollout::RolloutCoordinator;

use process::ZooKeeperProcess;

/// Options for creating an [`EnsembleController`].
pub struct EnsembleControllerOptions {
    /// The versioned configuration store.
    pub config_store: Arc<ConfigStore>,
    /// Rollout coordinator (for the rolling-state part of snapshots).
    pub coordinator: RolloutCoordinator,
    /// Backup pipeline (for the backup-active flag and the backups switch).
    pub backup: BackupPipeline,
}

struct Inner {
    config_store: Arc<ConfigStore>,
    coordinator: RolloutCoordinator,
    backup: BackupPipeline,
    switches: ControlPanel,
    process: Mutex<Option<ZooKeeperProcess>>,
    last_probe: RwLock<Probe>,
    known_spec: std::sync::Mutex<String>,
    started: AtomicBool,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

/// Owns the local ZooKeeper process lifecycle, the liveness monitor, the
/// log-cleanup task, and the system-state snapshot.
///
/// The snapshot is the only way callers observe process-wide state; nothing
/// here is mutated from outside.
#[derive(Clone)]
pub struct EnsembleController {
    inner: Arc<Inner>,
}

impl EnsembleController {
    /// Creates a new controller. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(
        EnsembleControllerOptions {
            config_store,
            coordinator,
            backup,
        }: EnsembleControllerOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config_store,
                coordinator,
                backup,
                switches: ControlPanel::default(),
                process: Mutex::new(None),
                last_probe: RwLock::new(Probe {
                    state: InstanceState::Latent,
                    is_leader: false,
                }),
                known_spec: std::sync::Mutex::new(String::new()),
                started: AtomicBool::new(false),
                shutdown_token: CancellationToken::new(),
                task_tracker: TaskTracker::new(),
            }),
        }
    }

    /// Starts the monitor and cleanup workers. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::Relaxed) {
            return;
        }

        let monitor = self.clone();
        self.inner.task_tracker.spawn(async move {
            monitor.run_monitor().await;
        });
        let cleaner = self.clone();
        self.inner.task_tracker.spawn(async move {
            cleaner.run_cleanup().await;
        });
        self.inner.task_tracker.close();
        info!("ensemble controller started");
    }

    /// Stops the workers and the supervised process.
    pub async fn shutdown(&self) {
        self.inner.shutdown_token.cancel();
        self.inner.task_tracker.wait().await;
        if let Some(process) = self.inner.process.lock().await.take() {
            process.stop().await;
        }
        info!("ensemble controller stopped");
    }

    /// Reads a control-panel switch.
    #[must_use]
    pub fn is_switch_enabled(&self, kind: SwitchKind) -> bool {
        self.inner.switches.is_enabled(kind)
    }

    /// Sets a control-panel switch. The backups switch also gates the
    /// backup pipeline.
    pub fn set_switch(&self, kind: SwitchKind, value: bool) {
        self.inner.switches.set(kind, value);
        if kind == SwitchKind::Backups {
            self.inner.backup.set_enabled(value);
        }
        info!(?kind, value, "control panel switch changed");
    }

    /// Snapshot of all control-panel switches.
    #[must_use]
    pub fn switches(&self) -> SwitchesView {
        self.inner.switches.view()
    }

    /// Latest local instance probe (from the monitor loop).
    pub async fn local_probe(&self) -> Probe {
        *self.inner.last_probe.read().await
    }

    /// Asks the local instance to stop. Fire-and-forget: the monitor loop
    /// relaunches it, so callers observe completion through state polls.
    pub fn restart_instance(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Some(process) = this.inner.process.lock().await.take() {
                info!("instance restart requested");
                process.stop().await;
            }
        });
    }

    /// Sends a four-letter word to the local instance.
    ///
    /// # Errors
    ///
    /// Propagates connection and validation errors.
    pub async fn four_letter_word(&self, word: &str) -> Result<String, Error> {
        let config = self.inner.config_store.get().await.config;
        four_letter(
            "localhost",
            config.client_port,
            word,
            config.connection_timeout(),
        )
        .await
    }

    /// Explorer for browsing the local instance's znode tree.
    pub async fn explorer(&self) -> ZkExplorer {
        let config = self.inner.config_store.get().await.config;
        ZkExplorer::new("localhost", config.client_port, config.connection_timeout())
    }

    /// Aggregated system state for status consumers.
    pub async fn snapshot(&self) -> SystemState {
        let current = self.inner.config_store.get().await;
        let config = current.config.clone();
        let rolling = self.inner.coordinator.state().await;
        let probe = self.local_probe().await;

        let servers = match config.server_list() {
            Ok(list) => {
                let probes = list.specs().iter().map(|spec| {
                    let config = &config;
                    async move {
                        let p = if spec.hostname == config.hostname {
                            probe
                        } else {
                            checker::probe(config, &spec.hostname).await
                        };
                        ServerStatus {
                            hostname: spec.hostname.clone(),
                            server_id: spec.server_id,
                            code: p.state.code(),
                            description: p.state.description().to_string(),
                            is_leader: p.is_leader,
                        }
                    }
                });
                futures::future::join_all(probes).await
            }
            Err(_) => Vec::new(),
        };

        SystemState {
            version: env!("CARGO_PKG_VERSION").to_string(),
            running: matches!(
                probe.state,
                InstanceState::Serving | InstanceState::NotServing
            ),
            backup_active: self.inner.backup.is_active(),
            switches: self.inner.switches.view(),
            state: probe.state.code(),
            description: probe.state.description().to_string(),
            server_id: config.server_id().map_or(-1, i64::from),
            config: current,
            rolling,
            servers,
        }
    }

    async fn run_monitor(&self) {
        loop {
            let config = self.inner.config_store.get().await.config;
            tokio::select! {
                () = self.inner.shutdown_token.cancelled() => break,
                () = tokio::time::sleep(config.check_period()) => {}
            }

            self.supervise(&config).await;

            let probe = checker::probe(&config, "localhost").await;
            *self.inner.last_probe.write().await = probe;

            // a process that stopped answering gets restarted
            if probe.state == InstanceState::Down
                && self.inner.switches.is_enabled(SwitchKind::Restarts)
            {
                let mut guard = self.inner.process.lock().await;
                if let Some(process) = guard.take() {
                    warn!("instance is down; restarting");
                    process.stop().await;
                }
            }
        }
    }

    async fn supervise(&self, config: &EnsembleConfig) {
        let spec_changed = {
            let mut known = self.inner.known_spec.lock().unwrap();
            if *known == config.servers_spec {
                false
            } else {
                let changed = !known.is_empty();
                known.clone_from(&config.servers_spec);
                changed
            }
        };

        let listed = config.server_id().is_some();
        let should_run = if listed {
            self.inner.switches.is_enabled(SwitchKind::Restarts)
        } else {
            self.inner.switches.is_enabled(SwitchKind::UnlistedRestarts)
        };

        let mut guard = self.inner.process.lock().await;
        if spec_changed {
            if let Some(process) = guard.take() {
                info!("server list changed; restarting instance");
                process.stop().await;
            }
        }

        let running = guard.as_mut().is_some_and(ZooKeeperProcess::is_running);
        if !running {
            if let Some(process) = guard.take() {
                process.stop().await; // reap the exited child
            }
            if should_run {
                match ZooKeeperProcess::launch(config).await {
                    Ok(process) => *guard = Some(process),
                    Err(e) => warn!(error = %e, "could not launch zookeeper"),
                }
            }
        }
    }

    async fn run_cleanup(&self) {
        loop {
            let config = self.inner.config_store.get().await.config;
            tokio::select! {
                () = self.inner.shutdown_token.cancelled() => break,
                () = tokio::time::sleep(std::time::Duration::from_millis(config.cleanup_period_ms)) => {}
            }
            if !self.inner.switches.is_enabled(SwitchKind::Cleanup) {
                continue;
            }
            match cleanup::cleanup_logs(
                std::path::Path::new(&config.data_dir),
                config.cleanup_max_files as usize,
            )
            .await
            {
                Ok(0) => {}
                Ok(removed) => info!(removed, "cleanup pass removed old logs"),
                Err(e) => warn!(error = %e, "cleanup pass failed"),
            }
        }
    }
}
