pub mod channels;
pub mod jobs;
pub mod recordings;
pub mod serve;

use svr_core::{SqliteJobStore, SqliteLibraryStore, SvrConfig};

use crate::Result;

pub(crate) fn open_library(config: &SvrConfig) -> Result<SqliteLibraryStore> {
    let store = SqliteLibraryStore::builder()
        .path(config.library_db())
        .media_root(config.recordings_dir())
        .build()?;
    store.initialize()?;
    Ok(store)
}

pub(crate) fn open_jobs(config: &SvrConfig) -> Result<SqliteJobStore> {
    let store = SqliteJobStore::builder().path(config.jobs_db()).build()?;
    store.initialize()?;
    Ok(store)
}
