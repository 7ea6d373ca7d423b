pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod jobs;
pub mod library;
pub mod media;
pub mod sqlite;

pub use capture::{
    CaptureError, CaptureResult, CaptureSession, ChannelRegistry, ResolverProbe, StreamProbe,
    StreamSupervisor, ThumbnailSupervisor,
};
pub use config::{load_svr_config, CaptureSection, PipelineSection, PreviewSection, SvrConfig};
pub use error::{ConfigError, Result};
pub use events::{Event, EventHub};
pub use jobs::{
    CutArgs, Job, JobError, JobFilter, JobProcessor, JobResult, JobStatus, SqliteJobStore, Task,
};
pub use library::{
    Channel, ChannelId, LibraryError, LibraryResult, MediaMetrics, NewChannel, PreviewPaths,
    Recording, RecordingId, SqliteLibraryStore,
};
pub use media::{
    CommandExecutor, MediaError, MediaInfo, MediaPipeline, MediaResult, PipelineEvent, Progress,
    SystemCommandExecutor, TranscodeTarget,
};
