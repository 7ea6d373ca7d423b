use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to spawn {command}: {source}")]
    Spawn { command: String, source: io::Error },
    #[error("{command} exited with status {status:?}: {stderr}")]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("could not parse probe output: {0}")]
    Probe(String),
    #[error("no video stream in {0}")]
    NoVideoStream(PathBuf),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type MediaResult<T> = Result<T, MediaError>;
