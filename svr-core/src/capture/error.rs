use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::jobs::JobError;
use crate::library::LibraryError;
use crate::media::MediaError;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("library error: {0}")]
    Library(#[from] LibraryError),
    #[error("job error: {0}")]
    Job(#[from] JobError),
    #[error("media error: {0}")]
    Media(#[from] MediaError),
    #[error("failed to spawn encoder {command}: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("encoder exited with status {status:?}: {stderr}")]
    Encoder {
        status: Option<i32>,
        stderr: String,
    },
    #[error("stream probe failed: {0}")]
    Probe(String),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type CaptureResult<T> = Result<T, CaptureError>;
