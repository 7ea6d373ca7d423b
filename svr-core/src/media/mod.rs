//! Thin wrappers around the external encoder/prober binaries. Long-running
//! operations stream [`PipelineEvent`]s; short ones run to completion and
//! surface the process stderr in their error.

mod error;
mod progress;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use crate::library::MediaMetrics;

pub use error::{MediaError, MediaResult};
pub use progress::{ParsedLine, PipelineEvent, Progress, ProgressParser};

/// Number of trailing stderr lines kept for diagnostics.
const STDERR_TAIL: usize = 40;

#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.output().await
    }
}

/// Everything probe reports about a media file.
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub metrics: MediaMetrics,
    pub fps: f64,
}

impl MediaInfo {
    /// Best estimate of the total video frame count, for percentage progress.
    pub fn total_frames(&self) -> Option<u64> {
        if self.fps > 0.0 && self.metrics.duration_secs > 0.0 {
            Some((self.fps * self.metrics.duration_secs).round() as u64)
        } else if self.metrics.packet_count > 0 {
            Some(self.metrics.packet_count)
        } else {
            None
        }
    }
}

/// Target of a convert job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeTarget {
    Height(u32),
    AudioOnly,
}

impl TranscodeTarget {
    /// Parses a profile label: `"audio"` or a resolution like `"720p"`.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        if label.eq_ignore_ascii_case("audio") {
            return Some(Self::AudioOnly);
        }
        label
            .strip_suffix('p')
            .and_then(|height| height.parse().ok())
            .map(Self::Height)
    }

    pub fn output_name(&self, stem: &str) -> String {
        match self {
            Self::Height(height) => format!("{stem}_{height}p.mp4"),
            Self::AudioOnly => format!("{stem}_audio.m4a"),
        }
    }
}

#[derive(Clone)]
pub struct MediaPipeline {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for MediaPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPipeline")
            .field("ffmpeg", &self.ffmpeg)
            .field("ffprobe", &self.ffprobe)
            .finish()
    }
}

impl MediaPipeline {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Reads container and stream metadata. Failure here on a file that was
    /// expected to be playable is how corruption is detected.
    pub async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        let mut command = Command::new(&self.ffprobe);
        command
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg("-count_packets")
            .arg(path);
        let rendered = render_command(&command);
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|source| MediaError::Spawn {
                command: rendered.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(MediaError::Failed {
                command: rendered,
                status: output.status.code(),
                stderr: tail_of(&String::from_utf8_lossy(&output.stderr)),
            });
        }
        let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)?;
        parsed.into_info()
    }

    pub async fn is_intact(&self, path: &Path) -> bool {
        self.probe(path).await.is_ok()
    }

    /// First video frame to an image file. Used for live thumbnails and for
    /// poster/cover generation.
    pub async fn extract_frame(&self, input: &str, output: &Path) -> MediaResult<()> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-frames:v")
            .arg("1")
            .arg("-q:v")
            .arg("2")
            .arg(output);
        self.run_checked(command).await
    }

    pub async fn extract_frame_at(
        &self,
        input: &Path,
        output: &Path,
        offset_seconds: f64,
    ) -> MediaResult<()> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-ss")
            .arg(format!("{offset_seconds:.3}"))
            .arg("-i")
            .arg(input)
            .arg("-frames:v")
            .arg("1")
            .arg("-q:v")
            .arg("2")
            .arg(output);
        self.run_checked(command).await
    }

    /// Composites `frames` evenly spaced frames into a single horizontal
    /// stripe image.
    pub async fn stripe(
        &self,
        input: &Path,
        output: &Path,
        frames: u32,
        total_frames: u64,
    ) -> MediaResult<()> {
        let frames = frames.max(1);
        let step = (total_frames / u64::from(frames)).max(1);
        let filter = format!("select='not(mod(n,{step}))',scale=160:-2,tile={frames}x1");
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(filter)
            .arg("-frames:v")
            .arg("1")
            .arg("-q:v")
            .arg("3")
            .arg(output);
        self.run_checked(command).await
    }

    /// Timelapse preview video: every n-th frame retimed to `fps`.
    pub fn timelapse(
        &self,
        input: &Path,
        output: &Path,
        fps: u32,
        total_frames: Option<u64>,
    ) -> MediaResult<mpsc::Receiver<PipelineEvent>> {
        let fps = fps.max(1);
        let step = total_frames
            .map(|total| (total / u64::from(fps) / 30).max(1))
            .unwrap_or(30);
        let filter = format!("select='not(mod(n,{step}))',setpts=N/({fps}*TB),scale=-2:360");
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-nostats")
            .arg("-progress")
            .arg("pipe:1")
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(filter)
            .arg("-an")
            .arg(output);
        self.spawn_streaming(command, total_frames)
    }

    /// Lossless segment extraction for cut jobs.
    pub async fn cut(
        &self,
        input: &Path,
        output: &Path,
        start: &str,
        end: &str,
    ) -> MediaResult<()> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-ss")
            .arg(start)
            .arg("-to")
            .arg(end)
            .arg("-c")
            .arg("copy")
            .arg("-avoid_negative_ts")
            .arg("make_zero")
            .arg(output);
        self.run_checked(command).await
    }

    /// Lossless concat of the segments listed in `manifest`.
    pub async fn merge(&self, manifest: &Path, output: &Path) -> MediaResult<()> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .arg("-i")
            .arg(manifest)
            .arg("-c")
            .arg("copy")
            .arg(output);
        self.run_checked(command).await
    }

    pub fn convert(
        &self,
        input: &Path,
        output: &Path,
        target: TranscodeTarget,
        total_frames: Option<u64>,
    ) -> MediaResult<mpsc::Receiver<PipelineEvent>> {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-nostats")
            .arg("-progress")
            .arg("pipe:1")
            .arg("-i")
            .arg(input);
        match target {
            TranscodeTarget::Height(height) => {
                command
                    .arg("-vf")
                    .arg(format!("scale=-2:{height}"))
                    .arg("-c:v")
                    .arg("libx264")
                    .arg("-preset")
                    .arg("veryfast")
                    .arg("-crf")
                    .arg("23")
                    .arg("-c:a")
                    .arg("aac");
            }
            TranscodeTarget::AudioOnly => {
                command.arg("-vn").arg("-c:a").arg("aac");
            }
        }
        command.arg(output);
        self.spawn_streaming(command, total_frames)
    }

    /// The encoder invocation for one live capture: skip-start offset,
    /// stream copy, fault-tolerant demuxing. The session owns the child.
    pub fn capture_command(&self, stream_url: &str, skip_start: u32, output: &Path) -> Command {
        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(stream_url);
        if skip_start > 0 {
            command.arg("-ss").arg(skip_start.to_string());
        }
        command
            .arg("-c")
            .arg("copy")
            .arg("-err_detect")
            .arg("ignore_err")
            .arg("-movflags")
            .arg("+faststart")
            .arg(output)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .stdout(Stdio::null());
        command
    }

    async fn run_checked(&self, mut command: Command) -> MediaResult<()> {
        let rendered = render_command(&command);
        debug!(command = %rendered, "running media command");
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|source| MediaError::Spawn {
                command: rendered.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(MediaError::Failed {
                command: rendered,
                status: output.status.code(),
                stderr: tail_of(&String::from_utf8_lossy(&output.stderr)),
            });
        }
        Ok(())
    }

    /// Spawns the process and drives its output into a typed event stream.
    /// The encoder's `progress=end` sentinel emits `Ended`; a non-zero exit
    /// emits `Failed` afterwards and is the authoritative outcome.
    fn spawn_streaming(
        &self,
        mut command: Command,
        total_frames: Option<u64>,
    ) -> MediaResult<mpsc::Receiver<PipelineEvent>> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let rendered = render_command(&command);
        debug!(command = %rendered, "spawning media command");
        let mut child = command.spawn().map_err(|source| MediaError::Spawn {
            command: rendered.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let _ = tx
                .send(PipelineEvent::Started {
                    pid,
                    command: rendered,
                })
                .await;

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

            let mut parser = ProgressParser::new(total_frames);
            let mut ended = false;
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match parser.push_line(&line) {
                        ParsedLine::Block(progress) => {
                            let _ = tx.send(PipelineEvent::Progress(progress)).await;
                        }
                        ParsedLine::End => {
                            ended = true;
                            let _ = tx.send(PipelineEvent::Ended).await;
                        }
                        ParsedLine::None => {}
                    }
                }
            }

            let stderr_tail = stderr_task.await.unwrap_or_default();
            match child.wait().await {
                Ok(status) if status.success() => {
                    if !ended {
                        let _ = tx.send(PipelineEvent::Ended).await;
                    }
                }
                Ok(status) => {
                    let _ = tx
                        .send(PipelineEvent::Failed(format!(
                            "exit status {:?}: {}",
                            status.code(),
                            stderr_tail.join(" | ")
                        )))
                        .await;
                }
                Err(err) => {
                    let _ = tx.send(PipelineEvent::Failed(err.to_string())).await;
                }
            }
        });
        Ok(rx)
    }
}

pub(crate) fn render_command(command: &Command) -> String {
    let std_command = command.as_std();
    let mut rendered = std_command.get_program().to_string_lossy().to_string();
    for arg in std_command.get_args() {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

fn tail_of(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL);
    lines[start..].join("\n")
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    nb_read_packets: Option<String>,
}

impl ProbeOutput {
    fn into_info(self) -> MediaResult<MediaInfo> {
        let format = self
            .format
            .ok_or_else(|| MediaError::Probe("missing format section".into()))?;
        let mut info = MediaInfo {
            metrics: MediaMetrics {
                duration_secs: parse_numeric(format.duration.as_deref()),
                size_bytes: parse_numeric::<u64>(format.size.as_deref()),
                bit_rate: parse_numeric::<u64>(format.bit_rate.as_deref()),
                ..MediaMetrics::default()
            },
            fps: 0.0,
        };
        for stream in &self.streams {
            let packets = parse_numeric::<u64>(stream.nb_read_packets.as_deref());
            info.metrics.packet_count += packets;
            if stream.codec_type.as_deref() == Some("video") && info.metrics.width == 0 {
                info.metrics.width = stream.width.unwrap_or(0);
                info.metrics.height = stream.height.unwrap_or(0);
                info.fps = stream
                    .avg_frame_rate
                    .as_deref()
                    .and_then(parse_frame_rate)
                    .unwrap_or(0.0);
            }
        }
        if self.streams.is_empty() {
            return Err(MediaError::Probe("no streams reported".into()));
        }
        Ok(info)
    }
}

fn parse_numeric<T: std::str::FromStr + Default>(value: Option<&str>) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or_default()
}

fn parse_frame_rate(value: &str) -> Option<f64> {
    match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den > 0.0 {
                Some(num / den)
            } else {
                None
            }
        }
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_json() {
        let raw = r#"{
            "format": {"duration": "12.5", "size": "1024", "bit_rate": "128000"},
            "streams": [
                {"codec_type": "video", "width": 1280, "height": 720,
                 "avg_frame_rate": "30000/1001", "nb_read_packets": "375"},
                {"codec_type": "audio", "nb_read_packets": "540"}
            ]
        }"#;
        let parsed: ProbeOutput = serde_json::from_str(raw).unwrap();
        let info = parsed.into_info().unwrap();
        assert_eq!(info.metrics.width, 1280);
        assert_eq!(info.metrics.height, 720);
        assert_eq!(info.metrics.packet_count, 915);
        assert!((info.fps - 29.97).abs() < 0.01);
        assert!(info.total_frames().is_some());
    }

    #[test]
    fn probe_without_streams_is_an_error() {
        let raw = r#"{"format": {"duration": "1.0"}, "streams": []}"#;
        let parsed: ProbeOutput = serde_json::from_str(raw).unwrap();
        assert!(parsed.into_info().is_err());
    }

    #[test]
    fn transcode_target_labels() {
        assert_eq!(TranscodeTarget::parse("720p"), Some(TranscodeTarget::Height(720)));
        assert_eq!(TranscodeTarget::parse("audio"), Some(TranscodeTarget::AudioOnly));
        assert_eq!(TranscodeTarget::parse("original"), None);
        assert_eq!(
            TranscodeTarget::Height(480).output_name("rec"),
            "rec_480p.mp4"
        );
    }
}
