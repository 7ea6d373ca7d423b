mod error;
mod processor;
mod rollback;
mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::library::{ChannelId, RecordingId};

pub use error::{JobError, JobResult};
pub use processor::JobProcessor;
pub use rollback::{RollbackGuard, TempArtifacts};
pub use store::{JobFilter, SqliteJobStore, SqliteJobStoreBuilder};

/// The closed set of deferred media work kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Preview,
    Cut,
    Convert,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Preview => "preview",
            Task::Cut => "cut",
            Task::Convert => "convert",
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Task {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preview" => Ok(Self::Preview),
            "cut" => Ok(Self::Cut),
            "convert" => Ok(Self::Convert),
            other => Err(JobError::InvalidTask(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Active,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(JobError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: i64,
    pub channel_id: ChannelId,
    pub recording_id: RecordingId,
    pub task: Task,
    pub status: JobStatus,
    /// Task-specific payload, opaque to the store.
    pub args: Option<String>,
    pub pid: Option<u32>,
    pub command: Option<String>,
    pub progress: Option<String>,
    pub error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Argument payload of a cut job. Interval strings stay in encoder-native
/// timestamp format and are passed through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutArgs {
    pub starts: Vec<String>,
    pub ends: Vec<String>,
    #[serde(rename = "deleteAfterCompletion", default)]
    pub delete_after_completion: bool,
}

impl CutArgs {
    pub fn validate(&self) -> JobResult<()> {
        if self.starts.is_empty() || self.starts.len() != self.ends.len() {
            return Err(JobError::InvalidArguments(format!(
                "cut intervals mismatched: {} starts, {} ends",
                self.starts.len(),
                self.ends.len()
            )));
        }
        Ok(())
    }
}
