use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tracing::warn;

use crate::sqlite::configure_connection;

use super::error::{LibraryError, LibraryResult};
use super::{
    Channel, ChannelId, MediaMetrics, NewChannel, PreviewPaths, Recording, RecordingId,
};

const LIBRARY_SCHEMA: &str = include_str!("../../../sql/library.sql");

#[derive(Debug, Clone)]
pub struct SqliteLibraryStoreBuilder {
    path: Option<PathBuf>,
    media_root: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteLibraryStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            media_root: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteLibraryStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn media_root(mut self, path: impl AsRef<Path>) -> Self {
        self.media_root = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> LibraryResult<SqliteLibraryStore> {
        let path = self.path.ok_or(LibraryError::MissingStore)?;
        let media_root = self.media_root.ok_or(LibraryError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteLibraryStore {
            path,
            media_root,
            flags,
        })
    }
}

/// Channel and recording persistence plus the path conventions that tie rows
/// to files under `media_root`.
#[derive(Debug, Clone)]
pub struct SqliteLibraryStore {
    path: PathBuf,
    media_root: PathBuf,
    flags: OpenFlags,
}

impl SqliteLibraryStore {
    pub fn builder() -> SqliteLibraryStoreBuilder {
        SqliteLibraryStoreBuilder::new()
    }

    fn open(&self) -> LibraryResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            LibraryError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| LibraryError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> LibraryResult<()> {
        let conn = self.open()?;
        conn.execute_batch(LIBRARY_SCHEMA)?;
        Ok(())
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn channel_dir(&self, channel: &Channel) -> PathBuf {
        self.media_root.join(&channel.name)
    }

    pub fn recording_path(&self, channel: &Channel, recording: &Recording) -> PathBuf {
        self.channel_dir(channel).join(&recording.filename)
    }

    pub fn create_channel(&self, new: &NewChannel) -> LibraryResult<Channel> {
        if new.name.is_empty()
            || new
                .name
                .chars()
                .any(|c| !c.is_ascii_alphanumeric() && c != '-' && c != '_')
        {
            return Err(LibraryError::InvalidChannelName(new.name.clone()));
        }
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO channels (name, display_name, source_url, skip_start_seconds,
                min_duration_minutes, is_favorite)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &new.name,
                &new.display_name,
                &new.source_url,
                new.skip_start_seconds,
                new.min_duration_minutes,
                new.is_favorite,
            ],
        )?;
        let id = conn.last_insert_rowid();
        self.channel_on(&conn, ChannelId(id))
    }

    pub fn channel(&self, id: ChannelId) -> LibraryResult<Channel> {
        let conn = self.open()?;
        self.channel_on(&conn, id)
    }

    fn channel_on(&self, conn: &Connection, id: ChannelId) -> LibraryResult<Channel> {
        conn.query_row(
            "SELECT * FROM channels WHERE id = ?1",
            [id.0],
            channel_from_row,
        )
        .optional()?
        .ok_or(LibraryError::ChannelNotFound(id.0))
    }

    /// Channels eligible for capture: not paused, not deleted, favorites
    /// first so they are probed earliest in each scan round.
    pub fn list_enabled(&self) -> LibraryResult<Vec<Channel>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM channels WHERE is_paused = 0 AND is_deleted = 0
             ORDER BY is_favorite DESC, name ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next()? {
            channels.push(channel_from_row(row)?);
        }
        Ok(channels)
    }

    pub fn list_channels(&self) -> LibraryResult<Vec<Channel>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM channels WHERE is_deleted = 0 ORDER BY is_favorite DESC, name ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next()? {
            channels.push(channel_from_row(row)?);
        }
        Ok(channels)
    }

    pub fn set_paused(&self, id: ChannelId, paused: bool) -> LibraryResult<()> {
        self.update_channel_flag(id, "is_paused", paused)
    }

    pub fn set_favorite(&self, id: ChannelId, favorite: bool) -> LibraryResult<()> {
        self.update_channel_flag(id, "is_favorite", favorite)
    }

    pub fn soft_delete_channel(&self, id: ChannelId) -> LibraryResult<()> {
        self.update_channel_flag(id, "is_deleted", true)
    }

    fn update_channel_flag(&self, id: ChannelId, column: &str, value: bool) -> LibraryResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            &format!("UPDATE channels SET {column} = ?1 WHERE id = ?2"),
            params![value, id.0],
        )?;
        if affected == 0 {
            return Err(LibraryError::ChannelNotFound(id.0));
        }
        Ok(())
    }

    /// Current minimum acceptable capture length. Re-read at finalize time;
    /// the value may have changed while the capture ran.
    pub fn min_duration_minutes(&self, id: ChannelId) -> LibraryResult<u32> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT min_duration_minutes FROM channels WHERE id = ?1",
            [id.0],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(LibraryError::ChannelNotFound(id.0))
    }

    pub fn set_min_duration(&self, id: ChannelId, minutes: u32) -> LibraryResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE channels SET min_duration_minutes = ?1 WHERE id = ?2",
            params![minutes, id.0],
        )?;
        if affected == 0 {
            return Err(LibraryError::ChannelNotFound(id.0));
        }
        Ok(())
    }

    pub fn skip_start_seconds(&self, id: ChannelId) -> LibraryResult<u32> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT skip_start_seconds FROM channels WHERE id = ?1",
            [id.0],
            |row| row.get(0),
        )
        .optional()?
        .ok_or(LibraryError::ChannelNotFound(id.0))
    }

    pub fn create_recording(
        &self,
        channel_id: ChannelId,
        filename: &str,
        metrics: &MediaMetrics,
    ) -> LibraryResult<Recording> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO recordings (channel_id, filename, duration_secs, size_bytes,
                bit_rate, width, height, packet_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                channel_id.0,
                filename,
                metrics.duration_secs,
                metrics.size_bytes as i64,
                metrics.bit_rate as i64,
                metrics.width,
                metrics.height,
                metrics.packet_count as i64,
            ],
        )?;
        let id = conn.last_insert_rowid();
        self.recording_on(&conn, RecordingId(id))
    }

    pub fn recording(&self, id: RecordingId) -> LibraryResult<Recording> {
        let conn = self.open()?;
        self.recording_on(&conn, id)
    }

    pub fn find_recording(&self, id: RecordingId) -> LibraryResult<Option<Recording>> {
        let conn = self.open()?;
        Ok(conn
            .query_row(
                "SELECT * FROM recordings WHERE id = ?1",
                [id.0],
                recording_from_row,
            )
            .optional()?)
    }

    fn recording_on(&self, conn: &Connection, id: RecordingId) -> LibraryResult<Recording> {
        conn.query_row(
            "SELECT * FROM recordings WHERE id = ?1",
            [id.0],
            recording_from_row,
        )
        .optional()?
        .ok_or(LibraryError::RecordingNotFound(id.0))
    }

    pub fn find_by_filename(
        &self,
        channel_id: ChannelId,
        filename: &str,
    ) -> LibraryResult<Option<Recording>> {
        let conn = self.open()?;
        Ok(conn
            .query_row(
                "SELECT * FROM recordings WHERE channel_id = ?1 AND filename = ?2",
                params![channel_id.0, filename],
                recording_from_row,
            )
            .optional()?)
    }

    pub fn list_recordings(&self, channel_id: ChannelId) -> LibraryResult<Vec<Recording>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM recordings WHERE channel_id = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let mut rows = stmt.query([channel_id.0])?;
        let mut recordings = Vec::new();
        while let Some(row) = rows.next()? {
            recordings.push(recording_from_row(row)?);
        }
        Ok(recordings)
    }

    pub fn update_metrics(&self, id: RecordingId, metrics: &MediaMetrics) -> LibraryResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE recordings SET duration_secs = ?1, size_bytes = ?2, bit_rate = ?3,
                width = ?4, height = ?5, packet_count = ?6
             WHERE id = ?7",
            params![
                metrics.duration_secs,
                metrics.size_bytes as i64,
                metrics.bit_rate as i64,
                metrics.width,
                metrics.height,
                metrics.packet_count as i64,
                id.0,
            ],
        )?;
        if affected == 0 {
            return Err(LibraryError::RecordingNotFound(id.0));
        }
        Ok(())
    }

    pub fn update_preview_paths(&self, id: RecordingId, paths: &PreviewPaths) -> LibraryResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE recordings SET preview_stripe = ?1, preview_video = ?2, preview_cover = ?3
             WHERE id = ?4",
            params![&paths.stripe, &paths.video, &paths.cover, id.0],
        )?;
        if affected == 0 {
            return Err(LibraryError::RecordingNotFound(id.0));
        }
        Ok(())
    }

    /// Removes the row and best-effort deletes the media file and any preview
    /// artifacts beside it. Used for corrupt sources and explicit deletes.
    pub fn destroy_recording(&self, id: RecordingId) -> LibraryResult<()> {
        let recording = self.recording(id)?;
        let channel = self.channel(recording.channel_id)?;
        let path = self.recording_path(&channel, &recording);
        for target in recording_artifacts(&path) {
            if let Err(err) = std::fs::remove_file(&target) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %target.display(), error = %err, "failed to remove recording file");
                }
            }
        }
        let conn = self.open()?;
        conn.execute("DELETE FROM recordings WHERE id = ?1", [id.0])?;
        Ok(())
    }
}

/// The media file plus the three derived preview artifacts, existing or not.
pub(crate) fn recording_artifacts(path: &Path) -> Vec<PathBuf> {
    let mut targets = vec![path.to_path_buf()];
    targets.push(stripe_path(path));
    targets.push(preview_video_path(path));
    targets.push(cover_path(path));
    targets
}

pub fn stripe_path(source: &Path) -> PathBuf {
    with_suffix(source, ".stripe.jpg")
}

pub fn preview_video_path(source: &Path) -> PathBuf {
    with_suffix(source, ".preview.mp4")
}

pub fn cover_path(source: &Path) -> PathBuf {
    with_suffix(source, ".cover.jpg")
}

fn with_suffix(source: &Path, suffix: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    source.with_file_name(format!("{stem}{suffix}"))
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: ChannelId(row.get("id")?),
        name: row.get("name")?,
        display_name: row.get("display_name")?,
        source_url: row.get("source_url")?,
        skip_start_seconds: row.get("skip_start_seconds")?,
        min_duration_minutes: row.get("min_duration_minutes")?,
        is_favorite: row.get("is_favorite")?,
        is_paused: row.get("is_paused")?,
        is_deleted: row.get("is_deleted")?,
        created_at: parse_timestamp(row.get("created_at")?)?,
    })
}

fn recording_from_row(row: &Row<'_>) -> rusqlite::Result<Recording> {
    Ok(Recording {
        id: RecordingId(row.get("id")?),
        channel_id: ChannelId(row.get("channel_id")?),
        filename: row.get("filename")?,
        metrics: MediaMetrics {
            duration_secs: row.get("duration_secs")?,
            size_bytes: row.get::<_, i64>("size_bytes")? as u64,
            bit_rate: row.get::<_, i64>("bit_rate")? as u64,
            width: row.get("width")?,
            height: row.get("height")?,
            packet_count: row.get::<_, i64>("packet_count")? as u64,
        },
        preview_stripe: row.get("preview_stripe")?,
        preview_video: row.get("preview_video")?,
        preview_cover: row.get("preview_cover")?,
        created_at: parse_timestamp(row.get("created_at")?)?,
    })
}

fn parse_timestamp(value: Option<NaiveDateTime>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    Ok(value.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)))
}
