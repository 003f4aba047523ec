use serde::{Deserialize, Serialize};

/// Operation type recorded in a transaction log entry.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Node creation.
    Create,
    /// Node deletion.
    Delete,
    /// Node data update.
    SetData,
    /// ACL update.
    SetAcl,
    /// Client session established.
    CreateSession,
    /// Client session closed.
    CloseSession,
    /// Multi-op transaction.
    Multi,
    /// Error transaction.
    Error,
    /// Any other operation code.
    Other,
}

impl OpKind {
    /// Maps a ZooKeeper transaction type code.
    #[must_use]
    pub const fn from_txn_type(txn_type: i32) -> Self {
        match txn_type {
            1 | 15 => Self::Create,
            2 => Self::Delete,
            5 => Self::SetData,
            7 => Self::SetAcl,
            -10 => Self::CreateSession,
            -11 => Self::CloseSession,
            14 => Self::Multi,
            -1 => Self::Error,
            _ => Self::Other,
        }
    }
}

/// One structured entry extracted from a transaction log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Transaction time, milliseconds since the epoch.
    pub time_ms: i64,
    /// Transaction id (total order within the ensemble).
    pub zxid: i64,
    /// Operation type.
    pub op: OpKind,
    /// Znode path, when the operation addresses one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Size of the data payload carried by the operation, in bytes.
    pub payload_bytes: u32,
}

/// One completed index build over a log range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// Unique index name.
    pub name: String,
    /// Earliest record time in the index.
    pub from_ms: i64,
    /// Latest record time in the index.
    pub to_ms: i64,
    /// Number of indexed records.
    pub entry_count: u64,
    /// Directory the index is stored in.
    pub location: String,
    /// When the build completed, milliseconds since the epoch.
    pub created_ms: i64,
}
