pub mod api;

pub use api::HttpJobService;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::provision::Identity;

/// Opaque reference to one remote rendering job. Carries the session
/// credential it was created under, so status and result calls need nothing
/// else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
    pub session_token: String,
}

/// Remote job lifecycle as observed through polling. Only the remote service
/// advances it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The rendering service as an opaque capability: submit a job, observe its
/// status, fetch the finished bytes.
#[async_trait]
pub trait RemoteJobService: Send + Sync {
    /// Upload the segment audio (and the shared video if the remote does not
    /// already hold it) and start a rendering job.
    async fn submit(&self, audio: &Path, video: &Path, identity: &Identity) -> Result<JobHandle>;

    async fn poll_status(&self, job: &JobHandle) -> Result<JobStatus>;

    async fn fetch_result(&self, job: &JobHandle) -> Result<Vec<u8>>;
}
