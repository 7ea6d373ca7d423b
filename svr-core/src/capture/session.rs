use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{Event, EventHub};
use crate::jobs::{SqliteJobStore, Task};
use crate::library::{Channel, SqliteLibraryStore};
use crate::media::{render_command, MediaPipeline};

use super::error::{CaptureError, CaptureResult};
use super::registry::ChannelRegistry;

const STDERR_TAIL: usize = 40;

/// Owns the whole lifecycle of one capture attempt for one channel: spawn,
/// supervise, finalize or discard. Exactly one session exists per channel at
/// a time; the registry's `start` gate guarantees it.
pub struct CaptureSession {
    channel: Channel,
    stream_url: String,
    registry: Arc<ChannelRegistry>,
    library: SqliteLibraryStore,
    jobs: SqliteJobStore,
    pipeline: MediaPipeline,
    events: EventHub,
}

/// Clears the channel's registry entry on every exit path. This is the
/// guarantee that lets a future `start` succeed; without it a panic or an
/// early return would wedge the channel as "recording" forever.
struct ClearGuard {
    registry: Arc<ChannelRegistry>,
    channel: Channel,
    events: EventHub,
}

impl Drop for ClearGuard {
    fn drop(&mut self) {
        self.registry.clear(self.channel.id);
        self.events.notify(Event::ChannelOffline {
            channel_id: self.channel.id,
            name: self.channel.name.clone(),
        });
        debug!(channel = %self.channel.name, "capture state cleared");
    }
}

impl CaptureSession {
    pub fn new(
        channel: Channel,
        stream_url: String,
        registry: Arc<ChannelRegistry>,
        library: SqliteLibraryStore,
        jobs: SqliteJobStore,
        pipeline: MediaPipeline,
        events: EventHub,
    ) -> Self {
        Self {
            channel,
            stream_url,
            registry,
            library,
            jobs,
            pipeline,
            events,
        }
    }

    pub async fn run(self) -> CaptureResult<()> {
        let session_id = Uuid::new_v4();
        let _guard = ClearGuard {
            registry: Arc::clone(&self.registry),
            channel: self.channel.clone(),
            events: self.events.clone(),
        };

        let channel_dir = self.library.channel_dir(&self.channel);
        tokio::fs::create_dir_all(&channel_dir)
            .await
            .map_err(|source| CaptureError::Io {
                source,
                path: channel_dir.clone(),
            })?;

        let filename = format!(
            "{}_{}.mp4",
            self.channel.name,
            Utc::now().format("%Y_%m_%d_%H_%M_%S")
        );
        let output = channel_dir.join(&filename);
        let started_at = Utc::now();

        let skip_start = self.library.skip_start_seconds(self.channel.id)?;
        let mut command = self
            .pipeline
            .capture_command(&self.stream_url, skip_start, &output);
        let rendered = render_command(&command);
        let mut child = command.spawn().map_err(|source| CaptureError::Spawn {
            command: rendered,
            source,
        })?;
        let pid = child.id().unwrap_or_default();
        self.registry
            .update_process(self.channel.id, pid, &filename, started_at);
        self.events.notify(Event::ChannelStart {
            channel_id: self.channel.id,
            filename: filename.clone(),
        });
        info!(
            channel = %self.channel.name,
            session = %session_id,
            pid,
            file = %filename,
            "capture started"
        );

        // Drain stderr concurrently; waiting with a full pipe would deadlock
        // the encoder.
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut lines = Vec::new();
            if let Some(err) = stderr {
                let mut reader = BufReader::new(err).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if lines.len() == STDERR_TAIL {
                        lines.remove(0);
                    }
                    lines.push(line);
                }
            }
            lines
        });

        let status = child.wait().await.map_err(|source| CaptureError::Io {
            source,
            path: output.clone(),
        })?;
        let stderr_tail = stderr_task.await.unwrap_or_default().join(" | ");

        if !status.success() && !is_interrupt_exit(&status) {
            warn!(
                channel = %self.channel.name,
                status = status.code(),
                stderr = %stderr_tail,
                "encoder failed, discarding partial file"
            );
            remove_quietly(&output);
            return Err(CaptureError::Encoder {
                status: status.code(),
                stderr: stderr_tail,
            });
        }

        let elapsed_secs = (Utc::now() - started_at).num_seconds().max(0) as u64;
        // Re-read: the threshold may have been changed while we recorded.
        let min_duration_secs =
            u64::from(self.library.min_duration_minutes(self.channel.id)?) * 60;
        if elapsed_secs < min_duration_secs {
            debug!(
                channel = %self.channel.name,
                elapsed_secs,
                min_duration_secs,
                "capture shorter than minimum duration, discarding"
            );
            remove_quietly(&output);
            return Ok(());
        }

        self.finalize(&filename, &output).await
    }

    async fn finalize(&self, filename: &str, output: &Path) -> CaptureResult<()> {
        let info = match self.pipeline.probe(output).await {
            Ok(info) => info,
            Err(err) => {
                warn!(
                    channel = %self.channel.name,
                    error = %err,
                    "finished capture is unreadable, discarding"
                );
                remove_quietly(output);
                return Err(err.into());
            }
        };
        let recording =
            self.library
                .create_recording(self.channel.id, filename, &info.metrics)?;
        self.events.notify(Event::RecordingAdd {
            channel_id: self.channel.id,
            recording_id: recording.id,
            filename: recording.filename.clone(),
        });
        let job = self
            .jobs
            .enqueue(self.channel.id, recording.id, Task::Preview, None)?;
        self.events.notify(Event::JobCreate {
            job_id: job.id,
            task: Task::Preview,
            recording_id: recording.id,
        });
        info!(
            channel = %self.channel.name,
            recording = %recording.id,
            duration = info.metrics.duration_secs,
            "recording finalized"
        );
        Ok(())
    }
}

/// An interrupt-driven stop is an expected outcome, not an encoder failure.
/// ffmpeg under SIGINT either dies by the signal or exits with 255.
#[cfg(unix)]
fn is_interrupt_exit(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(libc::SIGINT) || status.code() == Some(255)
}

#[cfg(not(unix))]
fn is_interrupt_exit(status: &ExitStatus) -> bool {
    status.code() == Some(255)
}

fn remove_quietly(path: &std::path::Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove capture output");
        }
    }
}
