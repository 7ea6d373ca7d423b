#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use svr_core::{
    Channel, EventHub, Event, JobProcessor, JobStatus, MediaMetrics, MediaPipeline, NewChannel,
    PreviewSection, Recording, SqliteJobStore, SqliteLibraryStore, Task,
};

/// Stand-in for ffmpeg: logs its invocation, honors an optional fail marker
/// in its arguments, emits a progress stream on stdout and creates the
/// output file (the last argument that is not a flag or a flag value).
fn ffmpeg_script(dir: &Path, log: &Path, fail_on: Option<&str>) -> PathBuf {
    let fail_clause = fail_on
        .map(|marker| format!("case \"$*\" in *{marker}*) exit 1 ;; esac\n"))
        .unwrap_or_default();
    let body = format!(
        "#!/bin/sh\n\
         echo \"$@\" >> \"{log}\"\n\
         {fail_clause}\
         out=\"\"\n\
         prev=\"\"\n\
         for arg in \"$@\"; do\n\
           case \"$arg\" in\n\
             -*|pipe:1) ;;\n\
             *)\n\
               case \"$prev\" in\n\
                 -v|-i|-ss|-to|-c|-c:v|-c:a|-vf|-frames:v|-q:v|-f|-safe|-err_detect|-movflags|-avoid_negative_ts|-preset|-crf|-progress|-loglevel) ;;\n\
                 *) out=\"$arg\" ;;\n\
               esac ;;\n\
           esac\n\
           prev=\"$arg\"\n\
         done\n\
         printf 'frame=10\\nprogress=continue\\nframe=20\\nprogress=end\\n'\n\
         if [ -n \"$out\" ]; then printf 'media' > \"$out\"; fi\n\
         exit 0\n",
        log = log.display(),
    );
    write_script(dir, "ffmpeg", &body)
}

fn ffprobe_script(dir: &Path, succeed: bool) -> PathBuf {
    let body = if succeed {
        "#!/bin/sh\n\
         cat <<'EOF'\n\
         {\"format\": {\"duration\": \"600.0\", \"size\": \"1048576\", \"bit_rate\": \"2000000\"},\n\
          \"streams\": [{\"codec_type\": \"video\", \"width\": 1280, \"height\": 720,\n\
                       \"avg_frame_rate\": \"25/1\", \"nb_read_packets\": \"15000\"}]}\n\
         EOF\n\
         exit 0\n"
            .to_string()
    } else {
        "#!/bin/sh\nexit 1\n".to_string()
    };
    write_script(dir, "ffprobe", &body)
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

struct Harness {
    _dir: TempDir,
    library: SqliteLibraryStore,
    jobs: SqliteJobStore,
    events: EventHub,
    channel: Channel,
    recording: Recording,
    source_path: PathBuf,
    channel_dir: PathBuf,
    call_log: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let media_root = dir.path().join("recordings");
        let library = SqliteLibraryStore::builder()
            .path(dir.path().join("library.sqlite"))
            .media_root(&media_root)
            .build()
            .unwrap();
        library.initialize().unwrap();
        let jobs = SqliteJobStore::builder()
            .path(dir.path().join("jobs.sqlite"))
            .build()
            .unwrap();
        jobs.initialize().unwrap();

        let channel = library
            .create_channel(&NewChannel {
                name: "alpha".into(),
                display_name: "Alpha".into(),
                source_url: "https://example.com/alpha".into(),
                skip_start_seconds: 0,
                min_duration_minutes: 0,
                is_favorite: false,
            })
            .unwrap();
        let recording = library
            .create_recording(channel.id, "alpha_source.mp4", &MediaMetrics::default())
            .unwrap();
        let channel_dir = media_root.join("alpha");
        std::fs::create_dir_all(&channel_dir).unwrap();
        let source_path = channel_dir.join("alpha_source.mp4");
        std::fs::write(&source_path, "source media").unwrap();

        let call_log = dir.path().join("calls.log");
        Self {
            _dir: dir,
            library,
            jobs,
            events: EventHub::default(),
            channel,
            recording,
            source_path,
            channel_dir,
            call_log,
        }
    }

    fn processor(&self, ffmpeg_fail_on: Option<&str>, ffprobe_ok: bool) -> JobProcessor {
        let bin = self._dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let ffmpeg = ffmpeg_script(&bin, &self.call_log, ffmpeg_fail_on);
        let ffprobe = ffprobe_script(&bin, ffprobe_ok);
        JobProcessor::new(
            self.library.clone(),
            self.jobs.clone(),
            MediaPipeline::new(ffmpeg, ffprobe),
            self.events.clone(),
            PreviewSection {
                stripe_frames: 12,
                timelapse_fps: 10,
                cover_offset_seconds: 5.0,
            },
            Duration::from_millis(50),
        )
    }

    fn temp_files(&self) -> Vec<String> {
        std::fs::read_dir(&self.channel_dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with("cut_"))
            .collect()
    }

    fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.call_log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cut_job_merges_segments_and_enqueues_preview() {
    let harness = Harness::new();
    let processor = harness.processor(None, true);
    let mut events = harness.events.subscribe();

    let args = r#"{"starts": ["00:00:10"], "ends": ["00:00:20"], "deleteAfterCompletion": false}"#;
    let job = harness
        .jobs
        .enqueue(harness.channel.id, harness.recording.id, Task::Cut, Some(args))
        .unwrap();

    assert_eq!(processor.process_next().await.unwrap(), Some(job.id));
    assert_eq!(harness.jobs.job(job.id).unwrap().status, JobStatus::Done);

    // exactly one segment was extracted, then cleaned up with the manifest
    let segment_cuts: Vec<String> = harness
        .calls()
        .into_iter()
        .filter(|call| call.contains("-to 00:00:20"))
        .collect();
    assert_eq!(segment_cuts.len(), 1);
    assert!(harness.temp_files().is_empty());

    // merged output exists as file and row
    let recordings = harness.library.list_recordings(harness.channel.id).unwrap();
    let merged = recordings
        .iter()
        .find(|r| r.filename.ends_with("_cut.mp4"))
        .expect("merged recording");
    assert!(harness.channel_dir.join(&merged.filename).exists());
    // source untouched
    assert!(harness.source_path.exists());

    // exactly one follow-on preview job
    let pending: Vec<_> = harness
        .jobs
        .list(&svr_core::JobFilter::default())
        .unwrap()
        .into_iter()
        .filter(|j| j.task == Task::Preview && j.status == JobStatus::Pending)
        .collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].recording_id, merged.id);

    let mut saw_recording_add = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, Event::RecordingAdd { .. }) {
            saw_recording_add = true;
        }
    }
    assert!(saw_recording_add);
}

#[tokio::test(flavor = "multi_thread")]
async fn cut_job_failure_rolls_back_all_segments() {
    let harness = Harness::new();
    // second interval (segment index 001) fails
    let processor = harness.processor(Some("_001.mp4"), true);

    let args = r#"{"starts": ["00:00:01", "00:01:00", "00:02:00"],
                   "ends": ["00:00:10", "00:01:10", "00:02:10"],
                   "deleteAfterCompletion": true}"#;
    let job = harness
        .jobs
        .enqueue(harness.channel.id, harness.recording.id, Task::Cut, Some(args))
        .unwrap();

    processor.process_next().await.unwrap();
    assert_eq!(harness.jobs.job(job.id).unwrap().status, JobStatus::Failed);

    // zero temp files remain, no merged recording, no follow-on job
    assert!(harness.temp_files().is_empty());
    let recordings = harness.library.list_recordings(harness.channel.id).unwrap();
    assert_eq!(recordings.len(), 1);
    assert!(harness.source_path.exists());
    let previews: Vec<_> = harness
        .jobs
        .list(&svr_core::JobFilter::default())
        .unwrap()
        .into_iter()
        .filter(|j| j.task == Task::Preview)
        .collect();
    assert!(previews.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn cut_job_can_destroy_source_after_merge() {
    let harness = Harness::new();
    let processor = harness.processor(None, true);

    let args = r#"{"starts": ["00:00:10"], "ends": ["00:00:20"], "deleteAfterCompletion": true}"#;
    let job = harness
        .jobs
        .enqueue(harness.channel.id, harness.recording.id, Task::Cut, Some(args))
        .unwrap();
    processor.process_next().await.unwrap();

    assert_eq!(harness.jobs.job(job.id).unwrap().status, JobStatus::Done);
    assert!(!harness.source_path.exists());
    assert!(harness
        .library
        .find_recording(harness.recording.id)
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn preview_job_generates_all_artifacts() {
    let harness = Harness::new();
    let processor = harness.processor(None, true);

    let job = harness
        .jobs
        .enqueue(
            harness.channel.id,
            harness.recording.id,
            Task::Preview,
            None,
        )
        .unwrap();
    processor.process_next().await.unwrap();

    assert_eq!(harness.jobs.job(job.id).unwrap().status, JobStatus::Done);
    let reloaded = harness.library.recording(harness.recording.id).unwrap();
    assert_eq!(
        reloaded.preview_stripe.as_deref(),
        Some("alpha_source.stripe.jpg")
    );
    assert_eq!(
        reloaded.preview_video.as_deref(),
        Some("alpha_source.preview.mp4")
    );
    assert_eq!(
        reloaded.preview_cover.as_deref(),
        Some("alpha_source.cover.jpg")
    );
    assert!(harness.channel_dir.join("alpha_source.preview.mp4").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn preview_job_destroys_corrupt_source() {
    let harness = Harness::new();
    // probing the source fails outright: the file is corrupt
    let processor = harness.processor(None, false);

    let job = harness
        .jobs
        .enqueue(
            harness.channel.id,
            harness.recording.id,
            Task::Preview,
            None,
        )
        .unwrap();
    processor.process_next().await.unwrap();

    assert_eq!(harness.jobs.job(job.id).unwrap().status, JobStatus::Failed);
    assert!(!harness.source_path.exists());
    assert!(harness
        .library
        .find_recording(harness.recording.id)
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn preview_failure_on_intact_source_keeps_recording() {
    let harness = Harness::new();
    // the stripe step fails but the source still probes fine
    let processor = harness.processor(Some(".stripe.jpg"), true);

    let job = harness
        .jobs
        .enqueue(
            harness.channel.id,
            harness.recording.id,
            Task::Preview,
            None,
        )
        .unwrap();
    processor.process_next().await.unwrap();

    assert_eq!(harness.jobs.job(job.id).unwrap().status, JobStatus::Failed);
    assert!(harness.source_path.exists());
    let reloaded = harness.library.recording(harness.recording.id).unwrap();
    assert!(reloaded.preview_video.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn convert_job_creates_recording_and_preview_job() {
    let harness = Harness::new();
    let processor = harness.processor(None, true);

    let job = harness
        .jobs
        .enqueue(
            harness.channel.id,
            harness.recording.id,
            Task::Convert,
            Some("\"720p\""),
        )
        .unwrap();
    processor.process_next().await.unwrap();

    assert_eq!(harness.jobs.job(job.id).unwrap().status, JobStatus::Done);
    let recordings = harness.library.list_recordings(harness.channel.id).unwrap();
    let converted = recordings
        .iter()
        .find(|r| r.filename == "alpha_source_720p.mp4")
        .expect("converted recording");
    assert!(harness.channel_dir.join(&converted.filename).exists());

    let previews: Vec<_> = harness
        .jobs
        .list(&svr_core::JobFilter::default())
        .unwrap()
        .into_iter()
        .filter(|j| j.task == Task::Preview && j.recording_id == converted.id)
        .collect();
    assert_eq!(previews.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn orphan_recovery_requeues_intact_and_destroys_corrupt() {
    let harness = Harness::new();
    harness
        .jobs
        .enqueue(
            harness.channel.id,
            harness.recording.id,
            Task::Preview,
            None,
        )
        .unwrap();
    let stranded = harness.jobs.claim_oldest_pending().unwrap().unwrap();

    // intact source: the job goes back to pending
    let processor = harness.processor(None, true);
    processor.recover_orphans().await.unwrap();
    assert_eq!(
        harness.jobs.job(stranded.id).unwrap().status,
        JobStatus::Pending
    );

    // corrupt source: recording destroyed, job failed
    let stranded = harness.jobs.claim_oldest_pending().unwrap().unwrap();
    let processor = harness.processor(None, false);
    processor.recover_orphans().await.unwrap();
    assert_eq!(
        harness.jobs.job(stranded.id).unwrap().status,
        JobStatus::Failed
    );
    assert!(harness
        .library
        .find_recording(harness.recording.id)
        .unwrap()
        .is_none());
    assert!(!harness.source_path.exists());
}
