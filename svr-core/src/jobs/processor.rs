use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PreviewSection;
use crate::events::{Event, EventHub};
use crate::library::{
    cover_path, preview_video_path, stripe_path, Channel, PreviewPaths, Recording,
    SqliteLibraryStore,
};
use crate::media::{MediaPipeline, PipelineEvent, TranscodeTarget};

use super::error::{JobError, JobResult};
use super::rollback::{RollbackGuard, TempArtifacts};
use super::store::SqliteJobStore;
use super::{CutArgs, Job, Task};

/// The single sequential worker. One job is active at any instant; media
/// encoding is heavy and concurrent workers would collide on temp filenames.
pub struct JobProcessor {
    library: SqliteLibraryStore,
    jobs: SqliteJobStore,
    pipeline: MediaPipeline,
    events: EventHub,
    preview: PreviewSection,
    poll_interval: Duration,
}

struct JobSource {
    channel: Channel,
    recording: Recording,
    path: PathBuf,
}

impl JobProcessor {
    pub fn new(
        library: SqliteLibraryStore,
        jobs: SqliteJobStore,
        pipeline: MediaPipeline,
        events: EventHub,
        preview: PreviewSection,
        poll_interval: Duration,
    ) -> Self {
        Self {
            library,
            jobs,
            pipeline,
            events,
            preview,
            poll_interval,
        }
    }

    /// Poll loop. Individual job failures are contained and never stop the
    /// loop; only cancellation does.
    pub async fn run(&self, token: CancellationToken) {
        if let Err(err) = self.recover_orphans().await {
            warn!(error = %err, "orphaned job recovery failed");
        }
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
            match self.process_next().await {
                Ok(_) => {}
                Err(err) => warn!(error = %err, "failed to claim next job"),
            }
        }
        info!("job processor stopped");
    }

    /// Claims and runs at most one job. Returns the id of the job that ran.
    pub async fn process_next(&self) -> JobResult<Option<i64>> {
        let Some(job) = self.jobs.claim_oldest_pending()? else {
            return Ok(None);
        };
        let id = job.id;
        self.process(job).await;
        Ok(Some(id))
    }

    /// Re-checks jobs stranded in the active state by a previous crash.
    /// Intact sources are requeued; corrupt ones are destroyed with their
    /// recording.
    pub async fn recover_orphans(&self) -> JobResult<()> {
        for job in self.jobs.active_jobs()? {
            match self.library.find_recording(job.recording_id)? {
                None => {
                    warn!(job = job.id, "orphaned job references missing recording");
                    self.jobs.mark_failed(job.id, "recording missing after restart")?;
                    self.events.notify(Event::JobError {
                        job_id: job.id,
                        error: "recording missing after restart".into(),
                    });
                }
                Some(recording) => {
                    let channel = self.library.channel(recording.channel_id)?;
                    let path = self.library.recording_path(&channel, &recording);
                    if self.pipeline.is_intact(&path).await {
                        info!(job = job.id, "requeueing interrupted job");
                        self.jobs.requeue(job.id)?;
                    } else {
                        warn!(job = job.id, path = %path.display(), "interrupted job left corrupt source");
                        self.library.destroy_recording(recording.id)?;
                        self.jobs.mark_failed(job.id, "source corrupt after restart")?;
                        self.events.notify(Event::JobDelete { job_id: job.id });
                    }
                }
            }
        }
        Ok(())
    }

    async fn process(&self, job: Job) {
        info!(job = job.id, task = %job.task, "job started");
        self.events.notify(Event::JobStart { job_id: job.id });
        let outcome = match job.task {
            Task::Preview => self.run_preview(&job).await,
            Task::Cut => self.run_cut(&job).await,
            Task::Convert => self.run_convert(&job).await,
        };
        match outcome {
            Ok(()) => {
                if let Err(err) = self.jobs.mark_done(job.id) {
                    warn!(job = job.id, error = %err, "failed to mark job done");
                }
                self.events.notify(Event::JobDone { job_id: job.id });
                info!(job = job.id, "job finished");
            }
            Err(err) => {
                let message = err.to_string();
                if let Err(err) = self.jobs.mark_failed(job.id, &message) {
                    warn!(job = job.id, error = %err, "failed to mark job failed");
                }
                self.events.notify(Event::JobError {
                    job_id: job.id,
                    error: message.clone(),
                });
                warn!(job = job.id, error = %message, "job failed");
            }
        }
    }

    fn source(&self, job: &Job) -> JobResult<JobSource> {
        let recording = self.library.recording(job.recording_id)?;
        let channel = self.library.channel(recording.channel_id)?;
        let path = self.library.recording_path(&channel, &recording);
        Ok(JobSource {
            channel,
            recording,
            path,
        })
    }

    fn report(&self, job_id: i64, text: &str) {
        if let Err(err) = self.jobs.update_progress(job_id, text) {
            debug!(job = job_id, error = %err, "failed to persist progress");
        }
        self.events.notify(Event::JobProgress {
            job_id,
            progress: text.to_string(),
        });
    }

    /// Consumes one pipeline event stream, mirroring progress into the job
    /// row. A `Failed` event is authoritative even when an `Ended` sentinel
    /// was seen before it.
    async fn drive_stream(
        &self,
        job_id: i64,
        stage: &str,
        mut rx: mpsc::Receiver<PipelineEvent>,
    ) -> JobResult<()> {
        let mut ended = false;
        let mut failure = None;
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::Started { pid, command } => {
                    if let Err(err) = self.jobs.update_process_info(job_id, pid, &command) {
                        debug!(job = job_id, error = %err, "failed to persist process info");
                    }
                }
                PipelineEvent::Progress(progress) => {
                    self.report(job_id, &format!("{stage} {}", progress.describe()));
                }
                PipelineEvent::Ended => ended = true,
                PipelineEvent::Failed(message) => failure = Some(message),
            }
        }
        if let Some(message) = failure {
            return Err(JobError::Step {
                stage: stage.to_string(),
                message,
            });
        }
        if !ended {
            return Err(JobError::Step {
                stage: stage.to_string(),
                message: "event stream closed before completion".into(),
            });
        }
        Ok(())
    }

    async fn run_preview(&self, job: &Job) -> JobResult<()> {
        let src = self.source(job)?;
        match self.generate_previews(job, &src).await {
            Ok(()) => Ok(()),
            Err(err) => {
                // A failed step on an unreadable source means no preview can
                // ever be produced; the recording itself is the casualty.
                if !self.pipeline.is_intact(&src.path).await {
                    warn!(
                        recording = %src.recording.id,
                        path = %src.path.display(),
                        "source corrupt, destroying recording"
                    );
                    self.library.destroy_recording(src.recording.id)?;
                    self.events.notify(Event::JobDelete { job_id: job.id });
                    return Err(JobError::SourceCorrupt(src.path));
                }
                Err(err)
            }
        }
    }

    async fn generate_previews(&self, job: &Job, src: &JobSource) -> JobResult<()> {
        let stripe = stripe_path(&src.path);
        let video = preview_video_path(&src.path);
        let cover = cover_path(&src.path);

        // Stale artifacts from an earlier attempt; removal is idempotent.
        let mut stale = TempArtifacts::new();
        stale.track(&stripe);
        stale.track(&video);
        stale.track(&cover);
        drop(stale);

        self.report(job.id, "probing source");
        let info = self.pipeline.probe(&src.path).await?;
        let total_frames = info.total_frames();

        self.report(job.id, "generating stripe");
        self.pipeline
            .stripe(
                &src.path,
                &stripe,
                self.preview.stripe_frames,
                total_frames.unwrap_or(self.preview.stripe_frames as u64),
            )
            .await?;

        let rx = self
            .pipeline
            .timelapse(&src.path, &video, self.preview.timelapse_fps, total_frames)?;
        self.drive_stream(job.id, "timelapse", rx).await?;

        self.report(job.id, "generating cover");
        let offset = self
            .preview
            .cover_offset_seconds
            .min(info.metrics.duration_secs / 2.0)
            .max(0.0);
        self.pipeline
            .extract_frame_at(&src.path, &cover, offset)
            .await?;

        let paths = PreviewPaths {
            stripe: file_name(&stripe),
            video: file_name(&video),
            cover: file_name(&cover),
        };
        self.library.update_preview_paths(src.recording.id, &paths)?;
        Ok(())
    }

    async fn run_cut(&self, job: &Job) -> JobResult<()> {
        let src = self.source(job)?;
        let raw = job
            .args
            .as_deref()
            .ok_or_else(|| JobError::InvalidArguments("cut job without arguments".into()))?;
        let args: CutArgs = serde_json::from_str(raw)?;
        args.validate()?;

        let channel_dir = self.library.channel_dir(&src.channel);
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let prefix = format!("cut_{stamp}");
        let total = args.starts.len();

        // Segments and manifest are intermediates on every path: removed on
        // failure and after a successful merge alike.
        let mut temps = TempArtifacts::new();
        let mut segments = Vec::with_capacity(total);
        for (index, (start, end)) in args.starts.iter().zip(&args.ends).enumerate() {
            let segment = channel_dir.join(format!("{prefix}_{index:03}.mp4"));
            self.report(job.id, &format!("cutting segment {}/{total}", index + 1));
            temps.track(&segment);
            self.pipeline.cut(&src.path, &segment, start, end).await?;
            segments.push(segment);
        }

        let manifest = channel_dir.join(format!("{prefix}.txt"));
        let mut listing = String::new();
        for segment in &segments {
            listing.push_str(&format!("file '{}'\n", segment.display()));
        }
        std::fs::write(&manifest, listing).map_err(|source| JobError::Io {
            source,
            path: manifest.clone(),
        })?;
        temps.track(&manifest);

        let merged_name = format!("{}_{stamp}_cut.mp4", src.channel.name);
        let merged = channel_dir.join(&merged_name);
        let guard = RollbackGuard::new(&merged);
        self.report(job.id, "merging segments");
        self.pipeline.merge(&manifest, &merged).await?;

        let info = self.pipeline.probe(&merged).await?;
        let recording =
            self.library
                .create_recording(src.channel.id, &merged_name, &info.metrics)?;
        guard.disarm();
        self.events.notify(Event::RecordingAdd {
            channel_id: src.channel.id,
            recording_id: recording.id,
            filename: recording.filename.clone(),
        });
        self.enqueue_preview(&recording)?;

        if args.delete_after_completion {
            self.library.destroy_recording(src.recording.id)?;
            self.events.notify(Event::JobDelete { job_id: job.id });
        }
        Ok(())
    }

    async fn run_convert(&self, job: &Job) -> JobResult<()> {
        let src = self.source(job)?;
        let raw = job
            .args
            .as_deref()
            .ok_or_else(|| JobError::InvalidArguments("convert job without arguments".into()))?;
        let label: String = serde_json::from_str(raw)?;
        let target = TranscodeTarget::parse(&label)
            .ok_or_else(|| JobError::InvalidArguments(format!("unknown profile: {label}")))?;

        let stem = src
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| src.recording.filename.clone());
        let output_name = target.output_name(&stem);
        let output = self.library.channel_dir(&src.channel).join(&output_name);

        let info = self.pipeline.probe(&src.path).await?;
        let guard = RollbackGuard::new(&output);
        let rx = self
            .pipeline
            .convert(&src.path, &output, target, info.total_frames())?;
        self.drive_stream(job.id, "convert", rx).await?;

        let metrics = self.pipeline.probe(&output).await?.metrics;
        let recording = self
            .library
            .create_recording(src.channel.id, &output_name, &metrics)?;
        guard.disarm();
        self.events.notify(Event::RecordingAdd {
            channel_id: src.channel.id,
            recording_id: recording.id,
            filename: recording.filename.clone(),
        });
        self.enqueue_preview(&recording)?;
        Ok(())
    }

    fn enqueue_preview(&self, recording: &Recording) -> JobResult<Job> {
        let job = self
            .jobs
            .enqueue(recording.channel_id, recording.id, Task::Preview, None)?;
        self.events.notify(Event::JobCreate {
            job_id: job.id,
            task: Task::Preview,
            recording_id: recording.id,
        });
        Ok(job)
    }
}

fn file_name(path: &std::path::Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}
