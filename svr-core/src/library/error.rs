use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("failed to open library database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on library database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("library path not configured")]
    MissingStore,
    #[error("channel not found: {0}")]
    ChannelNotFound(i64),
    #[error("recording not found: {0}")]
    RecordingNotFound(i64),
    #[error("channel name is not filesystem-safe: {0}")]
    InvalidChannelName(String),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

pub type LibraryResult<T> = Result<T, LibraryError>;
