use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use crate::jobs::Task;
use crate::library::{ChannelId, RecordingId};

/// Typed notifications fanned out to every connected listener. Wire names are
/// stable; consumers match on them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum Event {
    #[serde(rename = "channel:online")]
    ChannelOnline { channel_id: ChannelId, name: String },
    #[serde(rename = "channel:offline")]
    ChannelOffline { channel_id: ChannelId, name: String },
    #[serde(rename = "channel:start")]
    ChannelStart {
        channel_id: ChannelId,
        filename: String,
    },
    #[serde(rename = "channel:thumbnail")]
    ChannelThumbnail { channel_id: ChannelId },
    #[serde(rename = "recording:add")]
    RecordingAdd {
        channel_id: ChannelId,
        recording_id: RecordingId,
        filename: String,
    },
    #[serde(rename = "job:create")]
    JobCreate {
        job_id: i64,
        task: Task,
        recording_id: RecordingId,
    },
    #[serde(rename = "job:start")]
    JobStart { job_id: i64 },
    #[serde(rename = "job:progress")]
    JobProgress { job_id: i64, progress: String },
    #[serde(rename = "job:done")]
    JobDone { job_id: i64 },
    #[serde(rename = "job:error")]
    JobError { job_id: i64, error: String },
    #[serde(rename = "job:delete")]
    JobDelete { job_id: i64 },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ChannelOnline { .. } => "channel:online",
            Event::ChannelOffline { .. } => "channel:offline",
            Event::ChannelStart { .. } => "channel:start",
            Event::ChannelThumbnail { .. } => "channel:thumbnail",
            Event::RecordingAdd { .. } => "recording:add",
            Event::JobCreate { .. } => "job:create",
            Event::JobStart { .. } => "job:start",
            Event::JobProgress { .. } => "job:progress",
            Event::JobDone { .. } => "job:done",
            Event::JobError { .. } => "job:error",
            Event::JobDelete { .. } => "job:delete",
        }
    }
}

/// Broadcast fan-out. Sending never blocks; a send with no subscribers is
/// not an error.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Event>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// The subscription as a `Stream`, for consumers that select over it.
    pub fn stream(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.tx.subscribe())
    }

    pub fn notify(&self, event: Event) {
        trace!(event = event.name(), "broadcasting event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}
