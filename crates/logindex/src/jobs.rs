use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use uuid::Uuid;

/// What a background job is doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Index build.
    Build,
    /// Index deletion.
    Delete,
}

/// Where a background job is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, not started.
    Queued,
    /// Running.
    Running,
    /// Finished successfully.
    Done,
    /// Aborted; `message` explains why.
    Failed,
}

/// Status of an asynchronous index job. Replaces fire-and-forget log
/// messages so completion can be observed deterministically.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Job id.
    pub id: String,
    /// Job kind.
    pub kind: JobKind,
    /// Lifecycle state.
    pub state: JobState,
    /// Failure detail, or the produced index name on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Default)]
pub(crate) struct JobBoard {
    jobs: Mutex<HashMap<String, JobStatus>>,
}

impl JobBoard {
    pub(crate) fn create(&self, kind: JobKind) -> String {
        let id = Uuid::new_v4().to_string();
        let status = JobStatus {
            id: id.clone(),
            kind,
            state: JobState::Queued,
            message: None,
        };
        self.jobs.lock().unwrap().insert(id.clone(), status);
        id
    }

    pub(crate) fn update(&self, id: &str, state: JobState, message: Option<String>) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(id) {
            job.state = state;
            job.message = message;
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<JobStatus> {
        self.jobs.lock().unwrap().get(id).cloned()
    }
}
