use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CaptureSection;
use crate::events::{Event, EventHub};
use crate::jobs::SqliteJobStore;
use crate::library::SqliteLibraryStore;
use crate::media::MediaPipeline;

use super::probe::StreamProbe;
use super::registry::ChannelRegistry;
use super::session::CaptureSession;

/// Periodic scan over enabled channels: probe, register, spawn a capture
/// session per channel that just came online. Owns the set of running
/// session tasks and drains it on shutdown, because the sessions perform
/// the file and registry cleanup.
pub struct StreamSupervisor {
    library: SqliteLibraryStore,
    jobs: SqliteJobStore,
    registry: Arc<ChannelRegistry>,
    probe: Arc<dyn StreamProbe>,
    pipeline: MediaPipeline,
    events: EventHub,
    poll_interval: Duration,
    pacing: Duration,
}

impl StreamSupervisor {
    pub fn new(
        library: SqliteLibraryStore,
        jobs: SqliteJobStore,
        registry: Arc<ChannelRegistry>,
        probe: Arc<dyn StreamProbe>,
        pipeline: MediaPipeline,
        events: EventHub,
        config: &CaptureSection,
    ) -> Self {
        Self {
            library,
            jobs,
            registry,
            probe,
            pipeline,
            events,
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            pacing: Duration::from_secs(config.pacing_seconds),
        }
    }

    pub async fn run(&self, token: CancellationToken) {
        let mut sessions: JoinSet<()> = JoinSet::new();
        'scan: loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
            while let Some(result) = sessions.try_join_next() {
                if let Err(err) = result {
                    warn!(error = %err, "capture session task aborted");
                }
            }
            let channels = match self.library.list_enabled() {
                Ok(channels) => channels,
                Err(err) => {
                    warn!(error = %err, "failed to list channels");
                    continue;
                }
            };
            for channel in channels {
                if token.is_cancelled() {
                    break 'scan;
                }
                if self.registry.is_recording(channel.id) {
                    continue;
                }
                match self.probe.resolve(&channel.source_url).await {
                    Ok(Some(stream_url)) => {
                        if self.registry.start(channel.id, &channel.name) {
                            self.registry.mark_online(channel.id, &stream_url);
                            self.events.notify(Event::ChannelOnline {
                                channel_id: channel.id,
                                name: channel.name.clone(),
                            });
                            let name = channel.name.clone();
                            let session = CaptureSession::new(
                                channel,
                                stream_url,
                                Arc::clone(&self.registry),
                                self.library.clone(),
                                self.jobs.clone(),
                                self.pipeline.clone(),
                                self.events.clone(),
                            );
                            sessions.spawn(async move {
                                if let Err(err) = session.run().await {
                                    warn!(channel = %name, error = %err, "capture session failed");
                                }
                            });
                        }
                    }
                    Ok(None) => debug!(channel = %channel.name, "channel offline"),
                    Err(err) => warn!(channel = %channel.name, error = %err, "stream probe failed"),
                }
                // Pace probes within a round so a long channel list does not
                // hammer the source service.
                tokio::select! {
                    _ = token.cancelled() => break 'scan,
                    _ = sleep(self.pacing) => {}
                }
            }
        }

        // Interrupt every tracked encoder, then wait for the sessions to
        // finish their own cleanup before reporting quiesced.
        self.registry.terminate_all();
        while let Some(result) = sessions.join_next().await {
            if let Err(err) = result {
                warn!(error = %err, "capture session task aborted during shutdown");
            }
        }
        info!("stream supervisor stopped");
    }
}

/// Periodically snapshots a live frame for every online channel so the UI
/// always has a fresh thumbnail. Best-effort: failures never touch capture
/// state.
pub struct ThumbnailSupervisor {
    registry: Arc<ChannelRegistry>,
    pipeline: MediaPipeline,
    events: EventHub,
    media_root: PathBuf,
    interval: Duration,
}

impl ThumbnailSupervisor {
    pub const THUMBNAIL_NAME: &'static str = "live.jpg";

    pub fn new(
        registry: Arc<ChannelRegistry>,
        pipeline: MediaPipeline,
        events: EventHub,
        media_root: PathBuf,
        config: &CaptureSection,
    ) -> Self {
        Self {
            registry,
            pipeline,
            events,
            media_root,
            interval: Duration::from_secs(config.thumbnail_interval_seconds),
        }
    }

    pub async fn run(&self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
            for entry in self.registry.snapshot() {
                if !entry.is_online || entry.is_terminating {
                    continue;
                }
                let Some(stream_url) = entry.stream_url else {
                    continue;
                };
                let output = self.media_root.join(&entry.name).join(Self::THUMBNAIL_NAME);
                let pipeline = self.pipeline.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    match pipeline.extract_frame(&stream_url, &output).await {
                        Ok(()) => {
                            events.notify(Event::ChannelThumbnail {
                                channel_id: entry.channel_id,
                            });
                        }
                        Err(err) => {
                            debug!(channel = %entry.name, error = %err, "thumbnail snapshot failed");
                        }
                    }
                });
            }
        }
        info!("thumbnail supervisor stopped");
    }
}
