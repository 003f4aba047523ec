use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::record::{LogRecord, OpKind};

/// Filter applied by a search. Absent fields mean "match everything".
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFilter {
    /// Only rows whose path starts with this prefix.
    pub path_prefix: Option<String>,
    /// Only rows with this operation type.
    pub operation_type: Option<OpKind>,
    /// Only rows at or after this time.
    pub from_ms: Option<i64>,
    /// Only rows at or before this time.
    pub to_ms: Option<i64>,
    /// Row cap; 0 means unlimited.
    pub max_results: usize,
}

impl SearchFilter {
    pub(crate) fn matches(&self, record: &LogRecord) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !prefix.is_empty()
                && !record.path.as_deref().is_some_and(|p| p.starts_with(prefix.as_str()))
            {
                return false;
            }
        }
        if let Some(op) = self.operation_type {
            if record.op != op {
                return false;
            }
        }
        if let Some(from) = self.from_ms {
            if record.time_ms < from {
                return false;
            }
        }
        if let Some(to) = self.to_ms {
            if record.time_ms > to {
                return false;
            }
        }
        true
    }

    /// Applies the filter to already-ordered rows, honoring the row cap.
    pub(crate) fn apply(&self, rows: &[LogRecord]) -> Vec<LogRecord> {
        let iter = rows.iter().filter(|r| self.matches(r)).cloned();
        if self.max_results > 0 {
            iter.take(self.max_results).collect()
        } else {
            iter.collect()
        }
    }
}

/// A page of results from a query handle.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    /// The requested slice, timestamp ascending.
    pub rows: Vec<LogRecord>,
    /// Total rows matched by the handle's filter.
    pub total_matched: u64,
}

/// Server-side cursor over a cached, filtered view of an index.
pub(crate) struct Handle {
    pub(crate) index_name: String,
    pub(crate) rows: Vec<LogRecord>,
    pub(crate) last_access: Instant,
}
