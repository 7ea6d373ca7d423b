use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::library::{ChannelId, RecordingId};
use crate::sqlite::configure_connection;

use super::error::{JobError, JobResult};
use super::{Job, JobStatus, Task};

const JOBS_SCHEMA: &str = include_str!("../../../sql/jobs.sql");

#[derive(Debug, Clone)]
pub struct SqliteJobStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteJobStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteJobStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
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

    pub fn build(self) -> JobResult<SqliteJobStore> {
        let path = self.path.ok_or(JobError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteJobStore { path, flags })
    }
}

/// Persisted FIFO of deferred media work. The claim is transactional, which
/// is what makes "one active job" hold across concurrent enqueue sources.
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    path: PathBuf,
    flags: OpenFlags,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub channel: Option<ChannelId>,
    pub limit: Option<usize>,
}

impl SqliteJobStore {
    pub fn builder() -> SqliteJobStoreBuilder {
        SqliteJobStoreBuilder::new()
    }

    fn open(&self) -> JobResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            JobError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| JobError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> JobResult<()> {
        let conn = self.open()?;
        conn.execute_batch(JOBS_SCHEMA)?;
        Ok(())
    }

    pub fn enqueue(
        &self,
        channel_id: ChannelId,
        recording_id: RecordingId,
        task: Task,
        args: Option<&str>,
    ) -> JobResult<Job> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO jobs (channel_id, recording_id, task, args)
             VALUES (?1, ?2, ?3, ?4)",
            params![channel_id.0, recording_id.0, task.as_str(), args],
        )?;
        let id = conn.last_insert_rowid();
        self.job_on(&conn, id)
    }

    pub fn job(&self, id: i64) -> JobResult<Job> {
        let conn = self.open()?;
        self.job_on(&conn, id)
    }

    fn job_on(&self, conn: &Connection, id: i64) -> JobResult<Job> {
        conn.query_row("SELECT * FROM jobs WHERE id = ?1", [id], job_from_row)
            .optional()?
            .ok_or(JobError::NotFound(id))
    }

    /// Claims the oldest pending job across all task kinds, flipping it to
    /// active inside one transaction so only one claimant can win it.
    pub fn claim_oldest_pending(&self) -> JobResult<Option<Job>> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let candidate = tx
            .query_row(
                "SELECT * FROM jobs WHERE status = 'pending'
                 ORDER BY created_at ASC, id ASC LIMIT 1",
                [],
                job_from_row,
            )
            .optional()?;
        let Some(mut job) = candidate else {
            tx.commit()?;
            return Ok(None);
        };
        tx.execute(
            "UPDATE jobs SET status = 'active', started_at = CURRENT_TIMESTAMP,
                error = NULL WHERE id = ?1 AND status = 'pending'",
            [job.id],
        )?;
        tx.commit()?;
        job.status = JobStatus::Active;
        job.started_at = Some(Utc::now());
        Ok(Some(job))
    }

    pub fn mark_done(&self, id: i64) -> JobResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE jobs SET status = 'done', finished_at = CURRENT_TIMESTAMP WHERE id = ?1",
            [id],
        )?;
        if affected == 0 {
            return Err(JobError::NotFound(id));
        }
        Ok(())
    }

    pub fn mark_failed(&self, id: i64, error: &str) -> JobResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE jobs SET status = 'failed', error = ?1,
                finished_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![error, id],
        )?;
        if affected == 0 {
            return Err(JobError::NotFound(id));
        }
        Ok(())
    }

    /// Returns a crashed-while-active job to the pending queue.
    pub fn requeue(&self, id: i64) -> JobResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE jobs SET status = 'pending', pid = NULL, progress = NULL,
                started_at = NULL, error = NULL WHERE id = ?1",
            [id],
        )?;
        if affected == 0 {
            return Err(JobError::NotFound(id));
        }
        Ok(())
    }

    pub fn update_progress(&self, id: i64, progress: &str) -> JobResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE jobs SET progress = ?1 WHERE id = ?2",
            params![progress, id],
        )?;
        Ok(())
    }

    pub fn update_process_info(&self, id: i64, pid: u32, command: &str) -> JobResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE jobs SET pid = ?1, command = ?2 WHERE id = ?3",
            params![pid, command, id],
        )?;
        Ok(())
    }

    pub fn list(&self, filter: &JobFilter) -> JobResult<Vec<Job>> {
        let conn = self.open()?;
        let mut query = String::from("SELECT * FROM jobs");
        let mut clauses = Vec::new();
        let mut params: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(status) = filter.status {
            clauses.push(format!("status = ?{}", params.len() + 1));
            params.push(rusqlite::types::Value::Text(status.as_str().to_string()));
        }
        if let Some(channel) = filter.channel {
            clauses.push(format!("channel_id = ?{}", params.len() + 1));
            params.push(rusqlite::types::Value::Integer(channel.0));
        }
        if !clauses.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&clauses.join(" AND "));
        }
        query.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(
            params.iter().map(|value| value as &dyn rusqlite::ToSql),
        ))?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next()? {
            jobs.push(job_from_row(row)?);
        }
        Ok(jobs)
    }

    /// Jobs stranded in the active state, e.g. by a crash mid-job.
    pub fn active_jobs(&self) -> JobResult<Vec<Job>> {
        self.list(&JobFilter {
            status: Some(JobStatus::Active),
            ..JobFilter::default()
        })
    }

    pub fn delete(&self, id: i64) -> JobResult<()> {
        let conn = self.open()?;
        let affected = conn.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(JobError::NotFound(id));
        }
        Ok(())
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let task: String = row.get("task")?;
    let status: String = row.get("status")?;
    Ok(Job {
        id: row.get("id")?,
        channel_id: ChannelId(row.get("channel_id")?),
        recording_id: RecordingId(row.get("recording_id")?),
        task: task.parse().unwrap_or(Task::Preview),
        status: status.parse().unwrap_or(JobStatus::Pending),
        args: row.get("args")?,
        pid: row.get("pid")?,
        command: row.get("command")?,
        progress: row.get("progress")?,
        error: row.get("error")?,
        created_at: parse_timestamp(row.get("created_at")?)?,
        started_at: parse_timestamp(row.get("started_at")?)?,
        finished_at: parse_timestamp(row.get("finished_at")?)?,
    })
}

fn parse_timestamp(value: Option<NaiveDateTime>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    Ok(value.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)))
}
