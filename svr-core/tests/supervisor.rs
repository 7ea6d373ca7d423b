#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use svr_core::{
    CaptureResult, ChannelRegistry, EventHub, MediaPipeline, NewChannel, SqliteJobStore,
    SqliteLibraryStore, StreamProbe, StreamSupervisor, Task,
};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Reports the stream live on the first probe only.
struct OneShotProbe {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl StreamProbe for OneShotProbe {
    async fn resolve(&self, _source_url: &str) -> CaptureResult<Option<String>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(Some("https://example.com/live.m3u8".into()))
        } else {
            Ok(None)
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn supervisor_launches_session_and_quiesces_on_shutdown() {
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

    let bin = dir.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let ffmpeg = write_script(
        &bin,
        "ffmpeg",
        "#!/bin/sh\n\
         for arg in \"$@\"; do out=\"$arg\"; done\n\
         sleep 0.2\n\
         printf 'media' > \"$out\"\n\
         exit 0\n",
    );
    let ffprobe = write_script(
        &bin,
        "ffprobe",
        "#!/bin/sh\n\
         cat <<'EOF'\n\
         {\"format\": {\"duration\": \"30.0\", \"size\": \"65536\", \"bit_rate\": \"1000000\"},\n\
          \"streams\": [{\"codec_type\": \"video\", \"width\": 1280, \"height\": 720,\n\
                       \"avg_frame_rate\": \"25/1\", \"nb_read_packets\": \"750\"}]}\n\
         EOF\n\
         exit 0\n",
    );

    let registry = Arc::new(ChannelRegistry::new());
    let supervisor = StreamSupervisor::new(
        library.clone(),
        jobs.clone(),
        Arc::clone(&registry),
        Arc::new(OneShotProbe {
            calls: AtomicUsize::new(0),
        }),
        MediaPipeline::new(ffmpeg, ffprobe),
        EventHub::default(),
        &svr_core::CaptureSection {
            poll_interval_seconds: 1,
            pacing_seconds: 0,
            thumbnail_interval_seconds: 60,
            resolver_command: "unused".into(),
            resolver_args: Vec::new(),
        },
    );

    let token = CancellationToken::new();
    let handle = {
        let token = token.clone();
        tokio::spawn(async move { supervisor.run(token).await })
    };

    // one poll round plus enough slack for the session to finish
    tokio::time::sleep(Duration::from_secs(3)).await;
    token.cancel();
    handle.await.unwrap();

    let recordings = library.list_recordings(channel.id).unwrap();
    assert_eq!(recordings.len(), 1);
    let jobs = jobs.list(&svr_core::JobFilter::default()).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].task, Task::Preview);
    assert!(!registry.is_recording(channel.id));
}
