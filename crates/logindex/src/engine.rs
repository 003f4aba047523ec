use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::jobs::{JobBoard, JobKind, JobState, JobStatus};
use crate::record::{IndexEntry, LogRecord};
use crate::search::{Handle, PageResult, SearchFilter};
use crate::txlog;

const ENTRIES_FILE: &str = "entries.jsonl";
const META_FILE: &str = "meta.json";

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Options for opening a [`LogIndexEngine`].
pub struct LogIndexOptions {
    /// Directory indexes are stored under.
    pub index_dir: PathBuf,
    /// Log directory scanned when a build names no source.
    pub default_source: PathBuf,
    /// Idle time after which an unreleased query handle is reclaimed.
    pub handle_idle_timeout: Duration,
}

struct IndexState {
    entry: IndexEntry,
    marked_for_deletion: bool,
    open_handles: usize,
}

struct EngineInner {
    index_dir: PathBuf,
    default_source: PathBuf,
    handle_idle_timeout: Duration,
    registry: Mutex<Vec<IndexState>>,
    handles: Mutex<HashMap<String, Handle>>,
    builds: Mutex<HashMap<PathBuf, String>>,
    jobs: JobBoard,
    scan_count: AtomicU64,
    load_count: AtomicU64,
}

/// Builds, persists and serves queryable indexes over ensemble transaction
/// logs.
///
/// Builds and deletions run as background jobs with observable status; at
/// most one build per source path is in flight at a time.
#[derive(Clone)]
pub struct LogIndexEngine {
    inner: Arc<EngineInner>,
}

impl LogIndexEngine {
    /// Opens the engine, reloading index metadata persisted by earlier runs.
    ///
    /// # Errors
    ///
    /// Returns an error when the index directory cannot be created or read.
    pub async fn open(
        LogIndexOptions {
            index_dir,
            default_source,
            handle_idle_timeout,
        }: LogIndexOptions,
    ) -> Result<Self, Error> {
        tokio::fs::create_dir_all(&index_dir)
            .await
            .map_err(|e| Error::Io("error creating index directory", e))?;

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&index_dir)
            .await
            .map_err(|e| Error::Io("error reading index directory", e))?;
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| Error::Io("error reading index directory entry", e))?
        {
            let meta_path = item.path().join(META_FILE);
            match tokio::fs::read(&meta_path).await {
                Ok(data) => match serde_json::from_slice::<IndexEntry>(&data) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(path = %meta_path.display(), error = %e, "skipping unreadable index metadata"),
                },
                Err(_) => continue,
            }
        }
        entries.sort_by_key(|e| e.created_ms);

        Ok(Self {
            inner: Arc::new(EngineInner {
                index_dir,
                default_source,
                handle_idle_timeout,
                registry: Mutex::new(
                    entries
                        .into_iter()
                        .map(|entry| IndexState {
                            entry,
                            marked_for_deletion: false,
                            open_handles: 0,
                        })
                        .collect(),
                ),
                handles: Mutex::new(HashMap::new()),
                builds: Mutex::new(HashMap::new()),
                jobs: JobBoard::default(),
                scan_count: AtomicU64::new(0),
                load_count: AtomicU64::new(0),
            }),
        })
    }

    /// Indexes known to the engine, ordered by creation (most recent last).
    /// Indexes marked for deletion are not listed.
    pub fn list_indexes(&self) -> Vec<IndexEntry> {
        self.inner
            .registry
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.marked_for_deletion)
            .map(|s| s.entry.clone())
            .collect()
    }

    /// Starts an asynchronous index build over `source` (the default log
    /// directory when `None`) and returns the job id.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyBuilding`] when a build for the same source is
    /// already in flight; duplicate requests never start a second scan.
    pub fn begin_build(&self, source: Option<PathBuf>) -> Result<String, Error> {
        let source = source.unwrap_or_else(|| self.inner.default_source.clone());

        let job_id = {
            let mut builds = self.inner.builds.lock().unwrap();
            if builds.contains_key(&source) {
                return Err(Error::AlreadyBuilding { source_path: source });
            }
            let id = self.inner.jobs.create(JobKind::Build);
            builds.insert(source.clone(), id.clone());
            id
        };

        let engine = self.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            engine.run_build(source, id).await;
        });
        Ok(job_id)
    }

    async fn run_build(&self, source: PathBuf, job_id: String) {
        self.inner.jobs.update(&job_id, JobState::Running, None);
        self.inner.scan_count.fetch_add(1, Ordering::Relaxed);

        let result = self.build_once(&source, &job_id).await;
        self.inner.builds.lock().unwrap().remove(&source);

        match result {
            Ok(entry) => {
                info!(name = %entry.name, count = entry.entry_count, "index build completed");
                self.inner
                    .jobs
                    .update(&job_id, JobState::Done, Some(entry.name.clone()));
                self.inner.registry.lock().unwrap().push(IndexState {
                    entry,
                    marked_for_deletion: false,
                    open_handles: 0,
                });
            }
            Err(e) => {
                warn!(source = %source.display(), error = %e, "index build aborted");
                self.inner
                    .jobs
                    .update(&job_id, JobState::Failed, Some(e.to_string()));
            }
        }
    }

    async fn build_once(&self, source: &Path, job_id: &str) -> Result<IndexEntry, Error> {
        let mut records = Vec::new();
        for file in self.source_files(source).await? {
            let data = tokio::fs::read(&file)
                .await
                .map_err(|e| Error::Io("error reading log file", e))?;
            records.extend(txlog::decode_log(&data)?);
        }
        records.sort_by_key(|r| (r.time_ms, r.zxid));

        let name = format!("idx-{}", Uuid::new_v4().simple());
        let final_dir = self.inner.index_dir.join(&name);
        let temp_dir = self.inner.index_dir.join(format!(".build-{job_id}"));

        let entry = IndexEntry {
            name: name.clone(),
            from_ms: records.first().map_or(0, |r| r.time_ms),
            to_ms: records.last().map_or(0, |r| r.time_ms),
            entry_count: records.len() as u64,
            location: final_dir.to_string_lossy().into_owned(),
            created_ms: now_ms(),
        };

        let publish = async {
            tokio::fs::create_dir_all(&temp_dir)
                .await
                .map_err(|e| Error::Io("error creating build directory", e))?;

            let mut jsonl = Vec::new();
            for record in &records {
                serde_json::to_writer(&mut jsonl, record)?;
                jsonl.push(b'\n');
            }
            tokio::fs::write(temp_dir.join(ENTRIES_FILE), jsonl)
                .await
                .map_err(|e| Error::Io("error writing index entries", e))?;
            tokio::fs::write(temp_dir.join(META_FILE), serde_json::to_vec_pretty(&entry)?)
                .await
                .map_err(|e| Error::Io("error writing index metadata", e))?;

            // visible only once complete
            tokio::fs::rename(&temp_dir, &final_dir)
                .await
                .map_err(|e| Error::Io("error publishing index", e))?;
            Ok(entry)
        };

        let result = publish.await;
        if result.is_err() {
            let _ = tokio::fs::remove_dir_all(&temp_dir).await;
        }
        result
    }

    async fn source_files(&self, source: &Path) -> Result<Vec<PathBuf>, Error> {
        let metadata = tokio::fs::metadata(source)
            .await
            .map_err(|e| Error::Io("error reading log source", e))?;
        if metadata.is_file() {
            return Ok(vec![source.to_path_buf()]);
        }

        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(source)
            .await
            .map_err(|e| Error::Io("error reading log source directory", e))?;
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| Error::Io("error reading log source entry", e))?
        {
            let is_log = item
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with("log."));
            if is_log {
                files.push(item.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Marks an index for deletion and returns the delete job id. In-flight
    /// query handles stay valid; files are removed once they drain.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the index does not exist or is already
    /// marked.
    pub fn delete_index(&self, name: &str) -> Result<String, Error> {
        let location = {
            let mut registry = self.inner.registry.lock().unwrap();
            let state = registry
                .iter_mut()
                .find(|s| s.entry.name == name && !s.marked_for_deletion)
                .ok_or_else(|| Error::NotFound {
                    name: name.to_string(),
                })?;
            state.marked_for_deletion = true;
            state.entry.location.clone()
        };

        let job_id = self.inner.jobs.create(JobKind::Delete);
        let engine = self.clone();
        let id = job_id.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            engine.run_delete(name, location, id).await;
        });
        Ok(job_id)
    }

    async fn run_delete(&self, name: String, location: String, job_id: String) {
        self.inner.jobs.update(&job_id, JobState::Running, None);

        loop {
            let drained = {
                let registry = self.inner.registry.lock().unwrap();
                registry
                    .iter()
                    .find(|s| s.entry.name == name)
                    .is_none_or(|s| s.open_handles == 0)
            };
            if drained {
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }

        if let Err(e) = tokio::fs::remove_dir_all(&location).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(index = %name, error = %e, "error removing index files");
            }
        }
        self.inner
            .registry
            .lock()
            .unwrap()
            .retain(|s| s.entry.name != name);
        info!(index = %name, "index deleted");
        self.inner.jobs.update(&job_id, JobState::Done, None);
    }

    /// Runs a search, returning a query-handle id for paging.
    ///
    /// When `reuse` names a live handle on the same index, the filter
    /// refines that handle's cached rows in place; the source index is not
    /// reloaded (the load counter stays constant).
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown or deletion-marked indexes.
    pub async fn search(
        &self,
        index_name: &str,
        filter: &SearchFilter,
        reuse: Option<&str>,
    ) -> Result<String, Error> {
        self.sweep_idle_handles();

        if let Some(reuse_id) = reuse {
            let mut handles = self.inner.handles.lock().unwrap();
            if let Some(handle) = handles.get_mut(reuse_id) {
                if handle.index_name == index_name {
                    handle.rows = filter.apply(&handle.rows);
                    handle.last_access = Instant::now();
                    return Ok(reuse_id.to_string());
                }
            }
        }

        let location = {
            let registry = self.inner.registry.lock().unwrap();
            registry
                .iter()
                .find(|s| s.entry.name == index_name && !s.marked_for_deletion)
                .map(|s| s.entry.location.clone())
                .ok_or_else(|| Error::NotFound {
                    name: index_name.to_string(),
                })?
        };

        let rows = self.load_rows(Path::new(&location)).await?;
        let rows = filter.apply(&rows);

        let id = Uuid::new_v4().to_string();
        {
            let mut registry = self.inner.registry.lock().unwrap();
            if let Some(state) = registry.iter_mut().find(|s| s.entry.name == index_name) {
                state.open_handles += 1;
            }
        }
        self.inner.handles.lock().unwrap().insert(
            id.clone(),
            Handle {
                index_name: index_name.to_string(),
                rows,
                last_access: Instant::now(),
            },
        );
        Ok(id)
    }

    async fn load_rows(&self, location: &Path) -> Result<Vec<LogRecord>, Error> {
        let data = tokio::fs::read(location.join(ENTRIES_FILE))
            .await
            .map_err(|e| Error::Io("error reading index entries", e))?;
        self.inner.load_count.fetch_add(1, Ordering::Relaxed);

        let mut rows = Vec::new();
        for line in data.split(|&b| b == b'\n').filter(|l| !l.is_empty()) {
            rows.push(serde_json::from_slice(line)?);
        }
        Ok(rows)
    }

    /// Returns one page of a handle's rows plus the total match count.
    /// Ordering is stable (timestamp ascending) for the handle's lifetime.
    ///
    /// # Errors
    ///
    /// [`Error::HandleNotFound`] for released or expired handles.
    pub fn page(&self, handle_id: &str, offset: usize, length: usize) -> Result<PageResult, Error> {
        let mut handles = self.inner.handles.lock().unwrap();
        let handle = handles.get_mut(handle_id).ok_or_else(|| Error::HandleNotFound {
            id: handle_id.to_string(),
        })?;
        handle.last_access = Instant::now();

        Ok(PageResult {
            rows: handle.rows.iter().skip(offset).take(length).cloned().collect(),
            total_matched: handle.rows.len() as u64,
        })
    }

    /// Releases a query handle. Idempotent; releasing one handle never
    /// affects others on the same index.
    pub fn release_handle(&self, handle_id: &str) {
        let removed = self.inner.handles.lock().unwrap().remove(handle_id);
        if let Some(handle) = removed {
            self.release_index_handle(&handle.index_name);
        }
    }

    fn release_index_handle(&self, index_name: &str) {
        let mut registry = self.inner.registry.lock().unwrap();
        if let Some(state) = registry.iter_mut().find(|s| s.entry.name == index_name) {
            state.open_handles = state.open_handles.saturating_sub(1);
        }
    }

    fn sweep_idle_handles(&self) {
        let timeout = self.inner.handle_idle_timeout;
        let mut expired = Vec::new();
        {
            let mut handles = self.inner.handles.lock().unwrap();
            handles.retain(|id, handle| {
                if handle.last_access.elapsed() >= timeout {
                    expired.push((id.clone(), handle.index_name.clone()));
                    false
                } else {
                    true
                }
            });
        }
        for (id, index_name) in expired {
            info!(handle = %id, "reclaimed idle query handle");
            self.release_index_handle(&index_name);
        }
    }

    /// Status of a build or delete job.
    pub fn job(&self, job_id: &str) -> Option<JobStatus> {
        self.inner.jobs.get(job_id)
    }

    /// Serialized row data for an index, used by the backup pipeline.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown or deletion-marked indexes.
    pub async fn export(&self, name: &str) -> Result<Bytes, Error> {
        let location = {
            let registry = self.inner.registry.lock().unwrap();
            registry
                .iter()
                .find(|s| s.entry.name == name && !s.marked_for_deletion)
                .map(|s| s.entry.location.clone())
                .ok_or_else(|| Error::NotFound {
                    name: name.to_string(),
                })?
        };
        let data = tokio::fs::read(Path::new(&location).join(ENTRIES_FILE))
            .await
            .map_err(|e| Error::Io("error reading index entries", e))?;
        Ok(Bytes::from(data))
    }

    /// Number of source scans performed since startup.
    pub fn scan_count(&self) -> u64 {
        self.inner.scan_count.load(Ordering::Relaxed)
    }

    /// Number of index row loads performed since startup.
    pub fn load_count(&self) -> u64 {
        self.inner.load_count.load(Ordering::Relaxed)
    }
}
