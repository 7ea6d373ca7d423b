use serde::Serialize;

use svr_core::{CutArgs, Job, JobFilter, RecordingId, SvrConfig, Task, TranscodeTarget};

use crate::{render, AppError, DisplayFallback, JobCommands, OutputFormat, Result};

use super::{open_jobs, open_library};

#[derive(Debug, Serialize)]
pub struct JobRow {
    pub id: i64,
    pub task: String,
    pub status: String,
    pub recording_id: i64,
    pub progress: Option<String>,
    pub error: Option<String>,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            task: job.task.to_string(),
            status: job.status.to_string(),
            recording_id: job.recording_id.0,
            progress: job.progress.clone(),
            error: job.error.clone(),
        }
    }
}

impl DisplayFallback for Vec<JobRow> {
    fn display(&self) -> String {
        if self.is_empty() {
            return String::from("no jobs");
        }
        let mut out = format!(
            "{:<5} {:<8} {:<8} {:<10} progress\n",
            "id", "task", "status", "recording"
        );
        for row in self {
            out.push_str(&format!(
                "{:<5} {:<8} {:<8} {:<10} {}\n",
                row.id,
                row.task,
                row.status,
                row.recording_id,
                row.error
                    .as_deref()
                    .or(row.progress.as_deref())
                    .unwrap_or("-")
            ));
        }
        out.trim_end().to_string()
    }
}

impl DisplayFallback for JobRow {
    fn display(&self) -> String {
        format!("job {} ({}) enqueued", self.id, self.task)
    }
}

pub fn run(config: &SvrConfig, command: &JobCommands, format: OutputFormat) -> Result<()> {
    let library = open_library(config)?;
    let jobs = open_jobs(config)?;
    match command {
        JobCommands::List(args) => {
            let status: Option<svr_core::JobStatus> = args
                .status
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(|err: svr_core::JobError| AppError::InvalidArgument(err.to_string()))?;
            let rows: Vec<JobRow> = jobs
                .list(&JobFilter {
                    status,
                    channel: None,
                    limit: Some(args.limit),
                })?
                .iter()
                .map(JobRow::from)
                .collect();
            render(&rows, format)
        }
        JobCommands::Cut(args) => {
            let recording = library.recording(RecordingId(args.recording))?;
            let cut = CutArgs {
                starts: args.starts.clone(),
                ends: args.ends.clone(),
                delete_after_completion: args.delete_source,
            };
            cut.validate()
                .map_err(|err| AppError::InvalidArgument(err.to_string()))?;
            let payload = serde_json::to_string(&cut)?;
            let job = jobs.enqueue(
                recording.channel_id,
                recording.id,
                Task::Cut,
                Some(&payload),
            )?;
            render(&JobRow::from(&job), format)
        }
        JobCommands::Convert(args) => {
            if TranscodeTarget::parse(&args.profile).is_none() {
                return Err(AppError::InvalidArgument(format!(
                    "unknown profile: {}",
                    args.profile
                )));
            }
            let recording = library.recording(RecordingId(args.recording))?;
            let payload = serde_json::to_string(&args.profile)?;
            let job = jobs.enqueue(
                recording.channel_id,
                recording.id,
                Task::Convert,
                Some(&payload),
            )?;
            render(&JobRow::from(&job), format)
        }
    }
}
