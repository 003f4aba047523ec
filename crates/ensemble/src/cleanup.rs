//! Periodic transaction-log cleanup: retains only the newest N logs.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::Error;

/// Removes all but the newest `keep` transaction logs under the data
/// directory (ZooKeeper writes them to `version-2/`). Log file names embed
/// the starting zxid in hex, so lexicographic order is chronological.
///
/// Returns how many files were removed.
///
/// # Errors
///
/// Returns an error when the directory cannot be read or a file cannot be
/// removed.
pub(crate) async fn cleanup_logs(data_dir: &Path, keep: usize) -> Result<usize, Error> {
    let version_dir = data_dir.join("version-2");
    let dir = if version_dir.is_dir() {
        version_dir
    } else {
        data_dir.to_path_buf()
    };

    let mut logs: Vec<PathBuf> = Vec::new();
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Error::Io("error reading log directory", e)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::Io("error reading log directory entry", e))?
    {
        if entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with("log."))
        {
            logs.push(entry.path());
        }
    }
    logs.sort();

    if logs.len() <= keep {
        return Ok(0);
    }

    let surplus = logs.len() - keep;
    for path in &logs[..surplus] {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| Error::Io("error removing old log", e))?;
    }
    info!(removed = surplus, keep, "transaction logs cleaned up");
    Ok(surplus)
}
