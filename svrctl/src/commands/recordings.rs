use serde::Serialize;

use svr_core::{ChannelId, Recording, SvrConfig};

use crate::{render, DisplayFallback, OutputFormat, RecordingCommands, Result};

use super::open_library;

#[derive(Debug, Serialize)]
pub struct RecordingRow {
    pub id: i64,
    pub filename: String,
    pub duration_secs: f64,
    pub size_bytes: u64,
    pub resolution: String,
    pub has_previews: bool,
    pub created_at: Option<String>,
}

impl From<&Recording> for RecordingRow {
    fn from(recording: &Recording) -> Self {
        Self {
            id: recording.id.0,
            filename: recording.filename.clone(),
            duration_secs: recording.metrics.duration_secs,
            size_bytes: recording.metrics.size_bytes,
            resolution: format!("{}x{}", recording.metrics.width, recording.metrics.height),
            has_previews: recording.preview_video.is_some(),
            created_at: recording
                .created_at
                .map(format_timestamp),
        }
    }
}

fn format_timestamp(value: chrono::DateTime<chrono::Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S").to_string()
}

impl DisplayFallback for Vec<RecordingRow> {
    fn display(&self) -> String {
        if self.is_empty() {
            return String::from("no recordings");
        }
        let mut out = format!(
            "{:<5} {:<40} {:>9} {:>12} {:<11} previews\n",
            "id", "filename", "secs", "bytes", "resolution"
        );
        for row in self {
            out.push_str(&format!(
                "{:<5} {:<40} {:>9.1} {:>12} {:<11} {}\n",
                row.id, row.filename, row.duration_secs, row.size_bytes, row.resolution,
                row.has_previews
            ));
        }
        out.trim_end().to_string()
    }
}

pub fn run(config: &SvrConfig, command: &RecordingCommands, format: OutputFormat) -> Result<()> {
    let library = open_library(config)?;
    match command {
        RecordingCommands::List(args) => {
            let rows: Vec<RecordingRow> = library
                .list_recordings(ChannelId(args.channel))?
                .iter()
                .map(RecordingRow::from)
                .collect();
            render(&rows, format)
        }
    }
}
