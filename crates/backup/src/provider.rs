use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use warden_store::Store;

use crate::Error;

/// Type of a provider configuration field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Free-form string.
    String,
    /// Decimal integer.
    Integer,
}

/// Descriptor for one configuration field the active backup provider
/// accepts. The core only echoes these; values travel in the opaque
/// `backup_extra` map.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupExtraField {
    /// Settings-map key.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Field type.
    pub field_type: FieldType,
    /// Help text shown alongside the field.
    pub help: String,
}

/// Identity of one stored backup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupId {
    /// Index the backup was taken from.
    pub index_name: String,
    /// Upload time, milliseconds since the epoch.
    pub created_ms: i64,
}

/// Destination for index backups. Implementations are pluggable; the
/// pipeline treats their settings as an opaque key/value map.
#[async_trait]
pub trait BackupProvider: Send + Sync + 'static {
    /// Configuration fields this provider accepts.
    fn fields(&self) -> Vec<BackupExtraField>;

    /// Uploads one backup.
    async fn upload(
        &self,
        index_name: &str,
        created_ms: i64,
        data: Bytes,
        settings: &BTreeMap<String, String>,
    ) -> Result<(), Error>;

    /// Lists stored backups.
    async fn list(&self) -> Result<Vec<BackupId>, Error>;

    /// Deletes one stored backup.
    async fn delete(&self, id: &BackupId) -> Result<(), Error>;
}

/// Bridges any [`warden_store::Store`] backend into a [`BackupProvider`],
/// keying objects as `<index_name>/<created_ms>`.
#[derive(Clone)]
pub struct StoreBackupProvider<S: Store> {
    store: S,
}

impl<S: Store> StoreBackupProvider<S> {
    /// Wraps a store.
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    fn key(id: &BackupId) -> String {
        format!("{}/{}", id.index_name, id.created_ms)
    }

    fn parse_key(key: &str) -> Option<BackupId> {
        let (index_name, created) = key.rsplit_once('/')?;
        Some(BackupId {
            index_name: index_name.to_string(),
            created_ms: created.parse().ok()?,
        })
    }
}

#[async_trait]
impl<S: Store> BackupProvider for StoreBackupProvider<S> {
    fn fields(&self) -> Vec<BackupExtraField> {
        Vec::new()
    }

    async fn upload(
        &self,
        index_name: &str,
        created_ms: i64,
        data: Bytes,
        _settings: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let key = Self::key(&BackupId {
            index_name: index_name.to_string(),
            created_ms,
        });
        self.store
            .put(key, data)
            .await
            .map_err(|e| Error::Store(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<BackupId>, Error> {
        let keys = self
            .store
            .keys()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(keys.iter().filter_map(|k| Self::parse_key(k)).collect())
    }

    async fn delete(&self, id: &BackupId) -> Result<(), Error> {
        self.store
            .del(Self::key(id))
            .await
            .map_err(|e| Error::Store(e.to_string()))
    }
}
