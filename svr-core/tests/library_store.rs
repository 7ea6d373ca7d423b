use tempfile::TempDir;

use svr_core::{
    ChannelId, MediaMetrics, NewChannel, PreviewPaths, SqliteLibraryStore,
};

fn temp_store(dir: &TempDir) -> SqliteLibraryStore {
    let store = SqliteLibraryStore::builder()
        .path(dir.path().join("library.sqlite"))
        .media_root(dir.path().join("recordings"))
        .build()
        .expect("create store");
    store.initialize().expect("initialize store");
    store
}

fn channel(name: &str, favorite: bool) -> NewChannel {
    NewChannel {
        name: name.into(),
        display_name: name.into(),
        source_url: format!("https://example.com/{name}"),
        skip_start_seconds: 0,
        min_duration_minutes: 1,
        is_favorite: favorite,
    }
}

#[test]
fn list_enabled_prefers_favorites_and_skips_paused() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);

    let plain = store.create_channel(&channel("plain", false)).unwrap();
    let favorite = store.create_channel(&channel("favorite", true)).unwrap();
    let paused = store.create_channel(&channel("paused", false)).unwrap();
    store.set_paused(paused.id, true).unwrap();
    let deleted = store.create_channel(&channel("deleted", false)).unwrap();
    store.soft_delete_channel(deleted.id).unwrap();

    let enabled = store.list_enabled().unwrap();
    let names: Vec<&str> = enabled.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["favorite", "plain"]);
    assert_eq!(enabled[0].id, favorite.id);
    assert_eq!(enabled[1].id, plain.id);
}

#[test]
fn rejects_unsafe_channel_names() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    assert!(store.create_channel(&channel("../evil", false)).is_err());
    assert!(store.create_channel(&channel("", false)).is_err());
    assert!(store.create_channel(&channel("ok-name_2", false)).is_ok());
}

#[test]
fn min_duration_reflects_later_updates() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    let created = store.create_channel(&channel("alpha", false)).unwrap();
    assert_eq!(store.min_duration_minutes(created.id).unwrap(), 1);
    store.set_min_duration(created.id, 5).unwrap();
    assert_eq!(store.min_duration_minutes(created.id).unwrap(), 5);
    assert!(store.min_duration_minutes(ChannelId(999)).is_err());
}

#[test]
fn recording_roundtrip_and_preview_paths() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    let channel = store.create_channel(&channel("beta", false)).unwrap();

    let metrics = MediaMetrics {
        duration_secs: 120.5,
        size_bytes: 4096,
        bit_rate: 2_000_000,
        width: 1920,
        height: 1080,
        packet_count: 3600,
    };
    let recording = store
        .create_recording(channel.id, "beta_2026_01_01.mp4", &metrics)
        .unwrap();
    assert_eq!(recording.metrics.width, 1920);
    assert!(recording.preview_video.is_none());

    let found = store
        .find_by_filename(channel.id, "beta_2026_01_01.mp4")
        .unwrap()
        .expect("recording by filename");
    assert_eq!(found.id, recording.id);

    store
        .update_preview_paths(
            recording.id,
            &PreviewPaths {
                stripe: Some("beta_2026_01_01.stripe.jpg".into()),
                video: Some("beta_2026_01_01.preview.mp4".into()),
                cover: Some("beta_2026_01_01.cover.jpg".into()),
            },
        )
        .unwrap();
    let updated = store.recording(recording.id).unwrap();
    assert_eq!(
        updated.preview_cover.as_deref(),
        Some("beta_2026_01_01.cover.jpg")
    );
}

#[test]
fn destroy_recording_removes_row_and_files() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    let channel = store.create_channel(&channel("gamma", false)).unwrap();
    let recording = store
        .create_recording(channel.id, "gamma_take.mp4", &MediaMetrics::default())
        .unwrap();

    let path = store.recording_path(&channel, &recording);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "media").unwrap();
    let stripe = svr_core::library::stripe_path(&path);
    std::fs::write(&stripe, "stripe").unwrap();

    store.destroy_recording(recording.id).unwrap();
    assert!(!path.exists());
    assert!(!stripe.exists());
    assert!(store.find_recording(recording.id).unwrap().is_none());
}
