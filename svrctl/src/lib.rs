mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] svr_core::ConfigError),
    #[error("library error: {0}")]
    Library(#[from] svr_core::LibraryError),
    #[error("job error: {0}")]
    Job(#[from] svr_core::JobError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "SVR command-line control interface", long_about = None)]
pub struct Cli {
    /// Path to the main svr.toml
    #[arg(long, default_value = "configs/svr.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the capture supervisors and the job processor until interrupted
    Serve,
    /// Channel management
    #[command(subcommand)]
    Channel(ChannelCommands),
    /// Library inspection
    #[command(subcommand)]
    Recording(RecordingCommands),
    /// Job queue inspection and manual enqueue
    #[command(subcommand)]
    Job(JobCommands),
}

#[derive(Subcommand, Debug)]
pub enum ChannelCommands {
    /// Register a new channel
    Add(ChannelAddArgs),
    /// List known channels
    List,
    /// Stop capturing a channel
    Pause(ChannelIdArg),
    /// Resume capturing a channel
    Resume(ChannelIdArg),
    /// Toggle the favorite flag
    Favorite(ChannelFavoriteArgs),
    /// Change the minimum acceptable recording length
    MinDuration(ChannelMinDurationArgs),
}

#[derive(Args, Debug)]
pub struct ChannelMinDurationArgs {
    pub id: i64,
    /// Minutes; captures shorter than this are discarded
    pub minutes: u32,
}

#[derive(Args, Debug)]
pub struct ChannelAddArgs {
    /// Directory-safe channel name
    pub name: String,
    /// Source page or stream url
    pub url: String,
    #[arg(long)]
    pub display_name: Option<String>,
    /// Seconds to skip at capture start
    #[arg(long, default_value_t = 0)]
    pub skip_start: u32,
    /// Minimum acceptable recording length in minutes
    #[arg(long, default_value_t = 0)]
    pub min_duration: u32,
    #[arg(long, default_value_t = false)]
    pub favorite: bool,
}

#[derive(Args, Debug)]
pub struct ChannelIdArg {
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct ChannelFavoriteArgs {
    pub id: i64,
    #[arg(long, default_value_t = true)]
    pub value: bool,
}

#[derive(Subcommand, Debug)]
pub enum RecordingCommands {
    /// List recordings of a channel
    List(RecordingListArgs),
}

#[derive(Args, Debug)]
pub struct RecordingListArgs {
    #[arg(long)]
    pub channel: i64,
}

#[derive(Subcommand, Debug)]
pub enum JobCommands {
    /// List jobs
    List(JobListArgs),
    /// Enqueue a cut job for a recording
    Cut(JobCutArgs),
    /// Enqueue a convert job for a recording
    Convert(JobConvertArgs),
}

#[derive(Args, Debug)]
pub struct JobListArgs {
    /// Filter by status (pending, active, done, failed)
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct JobCutArgs {
    pub recording: i64,
    /// Interval starts, encoder timestamp format (repeatable)
    #[arg(long = "start", required = true)]
    pub starts: Vec<String>,
    /// Interval ends, matching --start count (repeatable)
    #[arg(long = "end", required = true)]
    pub ends: Vec<String>,
    /// Destroy the source recording after a successful merge
    #[arg(long, default_value_t = false)]
    pub delete_source: bool,
}

#[derive(Args, Debug)]
pub struct JobConvertArgs {
    pub recording: i64,
    /// Target profile: a resolution like 720p, or "audio"
    pub profile: String,
}

pub fn run(cli: Cli) -> Result<()> {
    let config = svr_core::load_svr_config(&cli.config)?;

    match &cli.command {
        Commands::Serve => commands::serve::run(&config),
        Commands::Channel(command) => commands::channels::run(&config, command, cli.format),
        Commands::Recording(command) => commands::recordings::run(&config, command, cli.format),
        Commands::Job(command) => commands::jobs::run(&config, command, cli.format),
    }
}

pub(crate) fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
            Ok(())
        }
    }
}

pub(crate) trait DisplayFallback {
    fn display(&self) -> String;
}
