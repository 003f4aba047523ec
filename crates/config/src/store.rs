use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::{EnsembleConfig, Error, VersionedConfig};

/// Durability seam for [`ConfigStore`].
#[async_trait]
pub trait ConfigPersistence: Send + Sync + 'static {
    /// Loads the last saved configuration, if any.
    async fn load(&self) -> Result<Option<VersionedConfig>, Error>;

    /// Durably saves a configuration.
    async fn save(&self, config: &VersionedConfig) -> Result<(), Error>;
}

/// Stores the configuration as JSON on disk, writing through a temp file so
/// a crash mid-write never leaves a torn document.
pub struct FsConfigPersistence {
    path: PathBuf,
}

impl FsConfigPersistence {
    /// Creates a persistence layer writing to the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigPersistence for FsConfigPersistence {
    async fn load(&self) -> Result<Option<VersionedConfig>, Error> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io("error reading config file", e)),
        }
    }

    async fn save(&self, config: &VersionedConfig) -> Result<(), Error> {
        let parent = self
            .path
            .parent()
            .map(std::path::Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| Error::Io("error creating config directory", e))?;

        let data = serde_json::to_vec_pretty(config)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut file = tempfile::NamedTempFile::new_in(&parent)
                .map_err(|e| Error::Io("error creating temp config file", e))?;
            std::io::Write::write_all(&mut file, &data)
                .map_err(|e| Error::Io("error writing config file", e))?;
            file.persist(&path)
                .map_err(|e| Error::Io("error replacing config file", e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Io("config save task failed", std::io::Error::other(e)))?
    }
}

/// Keeps the configuration in memory only. Used by tests and callers that
/// manage durability elsewhere.
#[derive(Default)]
pub struct MemoryConfigPersistence {
    saved: Mutex<Option<VersionedConfig>>,
}

impl MemoryConfigPersistence {
    /// Creates an empty in-memory persistence layer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigPersistence for MemoryConfigPersistence {
    async fn load(&self) -> Result<Option<VersionedConfig>, Error> {
        Ok(self.saved.lock().await.clone())
    }

    async fn save(&self, config: &VersionedConfig) -> Result<(), Error> {
        *self.saved.lock().await = Some(config.clone());
        Ok(())
    }
}

/// Versioned configuration storage with optimistic concurrency.
///
/// Exactly one configuration is current at a time; writers must present the
/// version they read, and a mismatch is rejected with [`Error::Conflict`]
/// rather than silently overwriting a concurrent update.
pub struct ConfigStore {
    current: RwLock<VersionedConfig>,
    persistence: Arc<dyn ConfigPersistence>,
}

impl ConfigStore {
    /// Opens the store, loading the persisted configuration or seeding it
    /// (as version 1) when none exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error when the seed fails validation or persistence fails.
    pub async fn open(
        persistence: Arc<dyn ConfigPersistence>,
        seed: EnsembleConfig,
    ) -> Result<Self, Error> {
        let current = match persistence.load().await? {
            Some(loaded) => loaded,
            None => {
                seed.validate()?;
                let initial = VersionedConfig {
                    version: 1,
                    config: seed,
                };
                persistence.save(&initial).await?;
                info!(version = initial.version, "seeded ensemble configuration");
                initial
            }
        };

        Ok(Self {
            current: RwLock::new(current),
            persistence,
        })
    }

    /// Returns the current configuration snapshot.
    pub async fn get(&self) -> VersionedConfig {
        self.current.read().await.clone()
    }

    /// Adopts a configuration pushed by the rollout coordinator of another
    /// member. Newer versions win; stale or duplicate pushes are ignored.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when the pushed configuration is invalid.
    pub async fn accept(&self, remote: VersionedConfig) -> Result<bool, Error> {
        remote.config.validate()?;

        let mut current = self.current.write().await;
        if remote.version <= current.version {
            return Ok(false);
        }
        self.persistence.save(&remote).await?;
        info!(version = remote.version, "adopted pushed ensemble configuration");
        *current = remote;
        Ok(true)
    }

    /// Replaces the configuration if `expected_version` still matches,
    /// returning the newly assigned version.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when `new` fails validation, [`Error::Conflict`]
    /// when the stored version moved past `expected_version`.
    pub async fn compare_and_set(
        &self,
        expected_version: u64,
        new: EnsembleConfig,
    ) -> Result<u64, Error> {
        new.validate()?;

        let mut current = self.current.write().await;
        if current.version != expected_version {
            return Err(Error::Conflict {
                expected: expected_version,
                actual: current.version,
            });
        }

        let updated = VersionedConfig {
            version: current.version + 1,
            config: new,
        };
        self.persistence.save(&updated).await?;
        info!(version = updated.version, "ensemble configuration updated");
        *current = updated;
        Ok(current.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> EnsembleConfig {
        EnsembleConfig {
            install_dir: "/opt/zookeeper".to_string(),
            data_dir: "/var/lib/zookeeper".to_string(),
            log_index_dir: "/var/lib/warden/index".to_string(),
            servers_spec: "zk1:1,zk2:2,zk3:3".to_string(),
            hostname: "zk1".to_string(),
            ..EnsembleConfig::default()
        }
    }

    async fn memory_store() -> ConfigStore {
        ConfigStore::open(Arc::new(MemoryConfigPersistence::new()), valid_config())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn seeds_at_version_one() {
        let store = memory_store().await;
        assert_eq!(store.get().await.version, 1);
    }

    #[tokio::test]
    async fn stale_version_always_conflicts() {
        let store = memory_store().await;

        let mut change = valid_config();
        change.check_ms = 15_000;
        let v2 = store.compare_and_set(1, change.clone()).await.unwrap();
        assert_eq!(v2, 2);

        // Writer still holding version 1 must be told about the conflict.
        change.check_ms = 20_000;
        let result = store.compare_and_set(1, change).await;
        assert!(matches!(
            result,
            Err(Error::Conflict { expected: 1, actual: 2 })
        ));
        assert_eq!(store.get().await.config.check_ms, 15_000);
    }

    #[tokio::test]
    async fn invalid_config_never_stored() {
        let store = memory_store().await;

        let bad = EnsembleConfig {
            client_port: 0,
            ..valid_config()
        };
        assert!(matches!(
            store.compare_and_set(1, bad).await,
            Err(Error::Validation { .. })
        ));
        assert_eq!(store.get().await.version, 1);
    }

    #[tokio::test]
    async fn fs_persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.json");

        {
            let store = ConfigStore::open(
                Arc::new(FsConfigPersistence::new(&path)),
                valid_config(),
            )
            .await
            .unwrap();
            let mut change = valid_config();
            change.cleanup_max_files = 7;
            store.compare_and_set(1, change).await.unwrap();
        }

        let reopened = ConfigStore::open(
            Arc::new(FsConfigPersistence::new(&path)),
            valid_config(),
        )
        .await
        .unwrap();
        let current = reopened.get().await;
        assert_eq!(current.version, 2);
        assert_eq!(current.config.cleanup_max_files, 7);
    }
}
