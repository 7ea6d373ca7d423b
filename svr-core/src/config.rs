use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SvrConfig {
    pub paths: PathsSection,
    pub capture: CaptureSection,
    pub pipeline: PipelineSection,
    pub preview: PreviewSection,
}

impl SvrConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.recordings_dir)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.data_dir)
    }

    pub fn library_db(&self) -> PathBuf {
        self.data_dir().join("library.sqlite")
    }

    pub fn jobs_db(&self) -> PathBuf {
        self.data_dir().join("jobs.sqlite")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub recordings_dir: String,
    pub data_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSection {
    /// Seconds between channel scan rounds.
    pub poll_interval_seconds: u64,
    /// Pause between consecutive probes within one round.
    pub pacing_seconds: u64,
    pub thumbnail_interval_seconds: u64,
    /// External command that resolves a channel page into a direct stream url.
    pub resolver_command: String,
    #[serde(default)]
    pub resolver_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    pub poll_interval_seconds: u64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewSection {
    /// Number of frames composited into the thumbnail stripe.
    pub stripe_frames: u32,
    pub timelapse_fps: u32,
    /// Offset into the recording for the cover frame.
    pub cover_offset_seconds: f64,
}

pub fn load_svr_config<P: AsRef<Path>>(path: P) -> Result<SvrConfig> {
    load_toml(path)
}

fn load_toml<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
