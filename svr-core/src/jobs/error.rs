use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::library::LibraryError;
use crate::media::MediaError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to open job database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on job database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("job database path not configured")]
    MissingStore,
    #[error("job not found: {0}")]
    NotFound(i64),
    #[error("invalid job status: {0}")]
    InvalidStatus(String),
    #[error("invalid job task: {0}")]
    InvalidTask(String),
    #[error("invalid job arguments: {0}")]
    InvalidArguments(String),
    #[error("source recording is corrupt: {0}")]
    SourceCorrupt(PathBuf),
    #[error("{stage} step failed: {message}")]
    Step { stage: String, message: String },
    #[error("library error: {0}")]
    Library(#[from] LibraryError),
    #[error("media error: {0}")]
    Media(#[from] MediaError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type JobResult<T> = Result<T, JobError>;
