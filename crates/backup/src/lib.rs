//! Periodic backup of indexed log data to a pluggable object store, with
//! age-based retention.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod provider;

pub use error::Error;
pub use provider::{BackupExtraField, BackupId, BackupProvider, FieldType, StoreBackupProvider};

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use warden_config::ConfigStore;
use warden_logindex::LogIndexEngine;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// What one pipeline pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackupRunReport {
    /// Indexes uploaded this pass.
    pub uploaded: usize,
    /// Backups deleted by retention this pass.
    pub deleted: usize,
}

/// Options for creating a [`BackupPipeline`].
pub struct BackupPipelineOptions {
    /// Source of `backup_period_ms` / `backup_max_store_ms` / settings.
    pub config_store: Arc<ConfigStore>,
    /// Engine the indexes are read from.
    pub engine: LogIndexEngine,
    /// Destination for backups.
    pub provider: Arc<dyn BackupProvider>,
}

/// Periodically uploads indexes that are not yet backed up and prunes
/// backups past the retention age. Failures are logged and retried on the
/// next pass; they never take the process down.
#[derive(Clone)]
pub struct BackupPipeline {
    config_store: Arc<ConfigStore>,
    engine: LogIndexEngine,
    provider: Arc<dyn BackupProvider>,
    active: Arc<AtomicBool>,
    enabled: Arc<AtomicBool>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl BackupPipeline {
    /// Creates a new, not-yet-started pipeline.
    #[must_use]
    pub fn new(
        BackupPipelineOptions {
            config_store,
            engine,
            provider,
        }: BackupPipelineOptions,
    ) -> Self {
        Self {
            config_store,
            engine,
            provider,
            active: Arc::new(AtomicBool::new(false)),
            enabled: Arc::new(AtomicBool::new(true)),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Enables or disables backup passes without stopping the worker.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Configuration fields declared by the active provider.
    #[must_use]
    pub fn fields(&self) -> Vec<BackupExtraField> {
        self.provider.fields()
    }

    /// True while the periodic worker is running and passes are enabled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed) && self.enabled.load(Ordering::Relaxed)
    }

    /// Starts the periodic worker. The period is re-read from the
    /// configuration store on every pass, so config changes take effect
    /// without a restart.
    pub fn start(&self) {
        if self.active.swap(true, Ordering::Relaxed) {
            return;
        }

        let pipeline = self.clone();
        self.task_tracker.spawn(async move {
            info!("backup pipeline started");
            loop {
                let period = pipeline.config_store.get().await.config.backup_period_ms;
                tokio::select! {
                    () = pipeline.shutdown_token.cancelled() => break,
                    () = tokio::time::sleep(Duration::from_millis(period)) => {}
                }
                if !pipeline.enabled.load(Ordering::Relaxed) {
                    continue;
                }
                match pipeline.run_once().await {
                    Ok(report) if report.uploaded > 0 || report.deleted > 0 => {
                        info!(uploaded = report.uploaded, deleted = report.deleted, "backup pass finished");
                    }
                    Ok(_) => debug!("backup pass: nothing to do"),
                    Err(e) => warn!(error = %e, "backup pass failed; will retry"),
                }
            }
            pipeline.active.store(false, Ordering::Relaxed);
            info!("backup pipeline stopped");
        });
        self.task_tracker.close();
    }

    /// Stops the worker and waits for the in-flight pass to finish.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.task_tracker.wait().await;
    }

    /// Runs one pipeline pass: upload indexes missing from the store, then
    /// prune backups older than the retention age.
    ///
    /// # Errors
    ///
    /// Returns an error only when the provider cannot even be listed;
    /// per-index failures are logged and skipped.
    pub async fn run_once(&self) -> Result<BackupRunReport, Error> {
        let config = self.config_store.get().await.config;
        let existing = self.provider.list().await?;
        let backed_up: HashSet<&str> = existing.iter().map(|id| id.index_name.as_str()).collect();

        let mut report = BackupRunReport::default();
        for entry in self.engine.list_indexes() {
            if backed_up.contains(entry.name.as_str()) {
                continue;
            }
            let data = match self.engine.export(&entry.name).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(index = %entry.name, error = %e, "skipping index backup");
                    continue;
                }
            };
            match self
                .provider
                .upload(&entry.name, now_ms(), data, &config.backup_extra)
                .await
            {
                Ok(()) => {
                    debug!(index = %entry.name, "index backed up");
                    report.uploaded += 1;
                }
                Err(e) => warn!(index = %entry.name, error = %e, "index upload failed"),
            }
        }

        let cutoff = now_ms() - config.backup_max_store_ms as i64;
        for id in existing.iter().filter(|id| id.created_ms < cutoff) {
            match self.provider.delete(id).await {
                Ok(()) => {
                    debug!(index = %id.index_name, created_ms = id.created_ms, "expired backup pruned");
                    report.deleted += 1;
                }
                Err(e) => warn!(index = %id.index_name, error = %e, "backup prune failed"),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use warden_config::{EnsembleConfig, MemoryConfigPersistence};
    use warden_logindex::{JobState, LogIndexOptions};
    use warden_store::Store;
    use warden_store_memory::MemoryStore;

    fn test_config() -> EnsembleConfig {
        EnsembleConfig {
            install_dir: "/opt/zookeeper".to_string(),
            data_dir: "/var/lib/zookeeper".to_string(),
            log_index_dir: "/var/lib/warden/index".to_string(),
            servers_spec: "zk1:1".to_string(),
            hostname: "zk1".to_string(),
            ..EnsembleConfig::default()
        }
    }

    async fn setup() -> (BackupPipeline, MemoryStore, LogIndexEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir_all(&logs).unwrap();

        let engine = LogIndexEngine::open(LogIndexOptions {
            index_dir: dir.path().join("index"),
            default_source: logs,
            handle_idle_timeout: Duration::from_secs(600),
        })
        .await
        .unwrap();

        let store = MemoryStore::new();
        let config_store = Arc::new(
            ConfigStore::open(Arc::new(MemoryConfigPersistence::new()), test_config())
                .await
                .unwrap(),
        );
        let pipeline = BackupPipeline::new(BackupPipelineOptions {
            config_store,
            engine: engine.clone(),
            provider: Arc::new(StoreBackupProvider::new(store.clone())),
        });
        (pipeline, store, engine, dir)
    }

    async fn build_empty_index(engine: &LogIndexEngine) -> String {
        let job_id = engine.begin_build(None).unwrap();
        let job = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = engine.job(&job_id).unwrap();
                if job.state == JobState::Done {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        job.message.unwrap()
    }

    #[tokio::test]
    async fn uploads_each_index_once() {
        let (pipeline, store, engine, _dir) = setup().await;
        let name = build_empty_index(&engine).await;

        let first = pipeline.run_once().await.unwrap();
        assert_eq!(first.uploaded, 1);
        let keys = store.keys().await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with(&format!("{name}/")));

        let second = pipeline.run_once().await.unwrap();
        assert_eq!(second.uploaded, 0);
        assert_eq!(store.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn prunes_backups_past_retention() {
        let (pipeline, store, _engine, _dir) = setup().await;
        // a backup uploaded far in the past (created_ms=1000)
        store
            .put("idx-old/1000", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let report = pipeline.run_once().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fresh_backups_are_retained() {
        let (pipeline, store, engine, _dir) = setup().await;
        build_empty_index(&engine).await;
        pipeline.run_once().await.unwrap();

        let report = pipeline.run_once().await.unwrap();

        assert_eq!(report.deleted, 0);
        assert_eq!(store.keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn active_flag_tracks_lifecycle() {
        let (pipeline, _store, _engine, _dir) = setup().await;
        assert!(!pipeline.is_active());

        pipeline.start();
        assert!(pipeline.is_active());

        pipeline.shutdown().await;
        assert!(!pipeline.is_active());
    }

    #[tokio::test]
    async fn store_provider_roundtrips_ids() {
        let store = MemoryStore::new();
        let provider = StoreBackupProvider::new(store.clone());

        provider
            .upload("idx-a", 42, Bytes::from_static(b"rows"), &Default::default())
            .await
            .unwrap();
        let listed = provider.list().await.unwrap();
        assert_eq!(
            listed,
            vec![BackupId {
                index_name: "idx-a".to_string(),
                created_ms: 42
            }]
        );

        provider.delete(&listed[0]).await.unwrap();
        assert!(provider.list().await.unwrap().is_empty());
    }
}
