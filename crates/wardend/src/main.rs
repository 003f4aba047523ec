//! Daemon binary: wires the warden subsystems together and serves the
//! admin API until interrupted.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_backup::{BackupPipeline, BackupPipelineOptions, StoreBackupProvider};
use warden_config::{ConfigStore, EnsembleConfig, FsConfigPersistence};
use warden_core::{Core, CoreOptions};
use warden_ensemble::{EnsembleController, EnsembleControllerOptions, RemoteMemberClient};
use warden_logindex::{LogIndexEngine, LogIndexOptions};
use warden_rollout::{RolloutCoordinator, RolloutCoordinatorOptions};
use warden_store_fs::FsStore;

/// CLI-specific error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] warden_config::Error),

    /// Core error.
    #[error(transparent)]
    Core(#[from] warden_core::Error),

    /// Index engine error.
    #[error(transparent)]
    Index(#[from] warden_logindex::Error),

    /// IO error.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about = "ZooKeeper ensemble supervisor", long_about = None)]
struct Args {
    /// Admin API port (also used to reach other members)
    #[arg(long, default_value_t = 8080, env = "WARDEN_ADMIN_PORT")]
    admin_port: u16,

    /// Path of the durable configuration document
    #[arg(
        long,
        default_value = "/var/lib/warden/warden.json",
        env = "WARDEN_CONFIG_FILE"
    )]
    config_file: PathBuf,

    /// ZooKeeper installation directory (initial configuration seed)
    #[arg(long, default_value = "/opt/zookeeper", env = "WARDEN_INSTALL_DIR")]
    install_dir: String,

    /// ZooKeeper data directory (initial configuration seed)
    #[arg(long, default_value = "/var/lib/zookeeper", env = "WARDEN_DATA_DIR")]
    data_dir: String,

    /// Directory log indexes are stored in (initial configuration seed)
    #[arg(
        long,
        default_value = "/var/lib/warden/index",
        env = "WARDEN_LOG_INDEX_DIR"
    )]
    log_index_dir: String,

    /// Ensemble specification, `host:id,host:id,...` (initial seed)
    #[arg(long, default_value = "localhost:1", env = "WARDEN_SERVERS_SPEC")]
    servers_spec: String,

    /// Hostname of this member within the ensemble
    #[arg(long, default_value = "localhost", env = "WARDEN_HOSTNAME")]
    hostname: String,

    /// Directory the filesystem backup store writes to
    #[arg(
        long,
        default_value = "/var/lib/warden/backups",
        env = "WARDEN_BACKUP_DIR"
    )]
    backup_dir: PathBuf,

    /// Seconds a restarted member gets to rejoin the quorum during a
    /// rolling rollout
    #[arg(long, default_value_t = 120, env = "WARDEN_REJOIN_TIMEOUT_SECS")]
    rejoin_timeout_secs: u64,

    /// Seconds an unreleased query handle may stay idle
    #[arg(long, default_value_t = 600, env = "WARDEN_HANDLE_IDLE_SECS")]
    handle_idle_secs: u64,
}

fn seed_config(args: &Args) -> EnsembleConfig {
    EnsembleConfig {
        install_dir: args.install_dir.clone(),
        data_dir: args.data_dir.clone(),
        log_index_dir: args.log_index_dir.clone(),
        servers_spec: args.servers_spec.clone(),
        hostname: args.hostname.clone(),
        ..EnsembleConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_store = Arc::new(
        ConfigStore::open(
            Arc::new(FsConfigPersistence::new(&args.config_file)),
            seed_config(&args),
        )
        .await?,
    );
    let config = config_store.get().await.config;

    let engine = LogIndexEngine::open(LogIndexOptions {
        index_dir: PathBuf::from(&config.log_index_dir),
        default_source: PathBuf::from(&config.data_dir).join("version-2"),
        handle_idle_timeout: Duration::from_secs(args.handle_idle_secs),
    })
    .await?;

    let backup = BackupPipeline::new(BackupPipelineOptions {
        config_store: config_store.clone(),
        engine: engine.clone(),
        provider: Arc::new(StoreBackupProvider::new(FsStore::new(&args.backup_dir))),
    });

    let coordinator = RolloutCoordinator::new(RolloutCoordinatorOptions {
        config_store: config_store.clone(),
        members: Arc::new(RemoteMemberClient::new(args.admin_port)),
        rejoin_timeout: Duration::from_secs(args.rejoin_timeout_secs),
    });

    let controller = EnsembleController::new(EnsembleControllerOptions {
        config_store: config_store.clone(),
        coordinator: coordinator.clone(),
        backup: backup.clone(),
    });

    let core = Core::new(CoreOptions {
        config_store,
        coordinator,
        engine,
        backup,
        controller,
        additional_tabs: Vec::new(),
    });

    core.start(args.admin_port).await?;
    info!(port = args.admin_port, hostname = %args.hostname, "warden started");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::Io("error waiting for interrupt", e))?;
    info!("interrupt received; shutting down");
    core.shutdown().await;
    Ok(())
}
