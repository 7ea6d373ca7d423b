use std::sync::Arc;

use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::media::{render_command, CommandExecutor, SystemCommandExecutor};

use super::error::{CaptureError, CaptureResult};

/// Resolves a channel's configured source URL into a direct, playable media
/// URL. `Ok(None)` means the channel is offline right now; that is an
/// expected state, retried on the next poll round.
#[async_trait::async_trait]
pub trait StreamProbe: Send + Sync {
    async fn resolve(&self, source_url: &str) -> CaptureResult<Option<String>>;
}

/// Shells out to an external resolver (streamlink/yt-dlp style: prints the
/// direct URL on stdout, exits non-zero when the stream is not live).
pub struct ResolverProbe {
    command: String,
    args: Vec<String>,
    executor: Arc<dyn CommandExecutor>,
    url_pattern: Regex,
}

impl ResolverProbe {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            executor: Arc::new(SystemCommandExecutor),
            url_pattern: Regex::new(r"^https?://\S+$").unwrap(),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }
}

#[async_trait::async_trait]
impl StreamProbe for ResolverProbe {
    async fn resolve(&self, source_url: &str) -> CaptureResult<Option<String>> {
        let mut command = Command::new(&self.command);
        command.args(&self.args).arg(source_url);
        let rendered = render_command(&command);
        let output = self
            .executor
            .run(&mut command)
            .await
            .map_err(|err| CaptureError::Probe(format!("{rendered}: {err}")))?;
        if !output.status.success() {
            debug!(source = source_url, status = output.status.code(), "resolver reports offline");
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let resolved = stdout
            .lines()
            .map(str::trim)
            .find(|line| self.url_pattern.is_match(line))
            .map(str::to_string);
        if resolved.is_none() {
            debug!(source = source_url, "resolver produced no stream url");
        }
        Ok(resolved)
    }
}
