mod error;
mod store;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{LibraryError, LibraryResult};
pub use store::{
    cover_path, preview_video_path, stripe_path, SqliteLibraryStore, SqliteLibraryStoreBuilder,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordingId(pub i64);

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A configured live-stream source. `name` doubles as the on-disk directory
/// for the channel's recordings and must stay filesystem-safe.
#[derive(Debug, Clone, Serialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub display_name: String,
    pub source_url: String,
    pub skip_start_seconds: u32,
    pub min_duration_minutes: u32,
    pub is_favorite: bool,
    pub is_paused: bool,
    pub is_deleted: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewChannel {
    pub name: String,
    pub display_name: String,
    pub source_url: String,
    pub skip_start_seconds: u32,
    pub min_duration_minutes: u32,
    pub is_favorite: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MediaMetrics {
    pub duration_secs: f64,
    pub size_bytes: u64,
    pub bit_rate: u64,
    pub width: u32,
    pub height: u32,
    pub packet_count: u64,
}

/// A persisted media file: either a finalized live capture or the output of
/// a cut/convert job.
#[derive(Debug, Clone, Serialize)]
pub struct Recording {
    pub id: RecordingId,
    pub channel_id: ChannelId,
    pub filename: String,
    pub metrics: MediaMetrics,
    pub preview_stripe: Option<String>,
    pub preview_video: Option<String>,
    pub preview_cover: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct PreviewPaths {
    pub stripe: Option<String>,
    pub video: Option<String>,
    pub cover: Option<String>,
}
