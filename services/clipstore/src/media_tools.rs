//! External media tool invocations (probe and faststart remux).
//!
//! [`FfmpegTools`] shells out to the ffprobe/ffmpeg binaries. [`FakeMediaTools`]
//! answers deterministically and is meant for tests and dry runs.

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

pub const PROBE_TOOL: &str = "ffprobe";
pub const REMUX_TOOL: &str = "ffmpeg";

/// Capability interface over the external media binaries
#[async_trait]
pub trait MediaTools: Send + Sync {
    /// Raw JSON stream listing for `input`
    async fn probe_streams(&self, input: &Path, cancel: &CancellationToken) -> Result<Vec<u8>>;

    /// Stream-copy `input` to `output` with the container index moved to the front
    async fn remux_faststart(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// ffprobe/ffmpeg backed implementation
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    ffprobe_path: String,
    ffmpeg_path: String,
    timeout: Duration,
}

impl FfmpegTools {
    pub fn new(ffprobe_path: impl Into<String>, ffmpeg_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
        }
    }

    /// Run a prepared command to completion, honouring the timeout and the
    /// cancellation token. The child is killed if either fires.
    async fn run(&self, tool: &str, mut cmd: Command, cancel: &CancellationToken) -> Result<Vec<u8>> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::upstream(tool, format!("failed to spawn: {e}")))?;

        let output = tokio::select! {
            result = tokio::time::timeout(self.timeout, child.wait_with_output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Err(Error::upstream(tool, format!("failed to collect output: {e}"))),
                Err(_) => {
                    warn!(tool, timeout_secs = self.timeout.as_secs(), "Media tool timed out");
                    return Err(Error::upstream(tool, format!("timed out after {:?}", self.timeout)));
                }
            },
            _ = cancel.cancelled() => {
                return Err(Error::upstream(tool, "cancelled"));
            }
        };

        if !output.status.success() {
            return Err(Error::upstream(
                tool,
                format!("{}: {}", output.status, stderr_tail(&output.stderr)),
            ));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl MediaTools for FfmpegTools {
    #[instrument(skip(self, cancel), fields(input = %input.display()))]
    async fn probe_streams(&self, input: &Path, cancel: &CancellationToken) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.ffprobe_path);
        cmd.args(["-v", "error", "-print_format", "json", "-show_streams"])
            .arg(input);

        let stdout = self.run(PROBE_TOOL, cmd, cancel).await?;
        debug!(bytes = stdout.len(), "Probe finished");
        Ok(stdout)
    }

    #[instrument(skip(self, cancel), fields(input = %input.display(), output = %output.display()))]
    async fn remux_faststart(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-i")
            .arg(input)
            .args(["-c", "copy", "-movflags", "faststart", "-f", "mp4", "-y"])
            .arg(output);

        self.run(REMUX_TOOL, cmd, cancel).await?;
        debug!("Remux finished");
        Ok(())
    }
}

/// Last few stderr lines, enough to identify the failure in logs
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    let tail = lines[start..].join(" | ");
    if tail.is_empty() {
        "no diagnostic output".to_string()
    } else {
        tail
    }
}

/// Scripted probe response for [`FakeMediaTools`]
#[derive(Debug, Clone)]
pub enum FakeProbe {
    /// Report a single video stream with these dimensions
    Dimensions { width: u32, height: u32 },
    /// Return these bytes verbatim as probe output
    Raw(Vec<u8>),
    /// Fail as if the tool exited non-zero
    Fail(String),
}

/// Deterministic stand-in for the external tools
#[derive(Debug)]
pub struct FakeMediaTools {
    probe: FakeProbe,
    remux_failure: Option<String>,
    probe_calls: AtomicUsize,
    remux_outputs: Mutex<Vec<PathBuf>>,
}

impl FakeMediaTools {
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self::with_probe(FakeProbe::Dimensions { width, height })
    }

    pub fn with_probe(probe: FakeProbe) -> Self {
        Self {
            probe,
            remux_failure: None,
            probe_calls: AtomicUsize::new(0),
            remux_outputs: Mutex::new(Vec::new()),
        }
    }

    /// Make the remux write a partial output and then fail
    pub fn failing_remux(mut self, message: impl Into<String>) -> Self {
        self.remux_failure = Some(message.into());
        self
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    /// Output paths the remux was asked to write
    pub fn remux_outputs(&self) -> Vec<PathBuf> {
        self.remux_outputs.lock().clone()
    }
}

#[async_trait]
impl MediaTools for FakeMediaTools {
    async fn probe_streams(&self, _input: &Path, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(Error::upstream(PROBE_TOOL, "cancelled"));
        }

        match &self.probe {
            FakeProbe::Dimensions { width, height } => {
                let body = serde_json::json!({
                    "streams": [{
                        "index": 0,
                        "codec_type": "video",
                        "codec_name": "h264",
                        "width": width,
                        "height": height
                    }]
                });
                serde_json::to_vec(&body).map_err(|e| Error::upstream(PROBE_TOOL, e.to_string()))
            }
            FakeProbe::Raw(bytes) => Ok(bytes.clone()),
            FakeProbe::Fail(message) => Err(Error::upstream(PROBE_TOOL, message.clone())),
        }
    }

    async fn remux_faststart(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.remux_outputs.lock().push(output.to_path_buf());
        if cancel.is_cancelled() {
            return Err(Error::upstream(REMUX_TOOL, "cancelled"));
        }

        if let Some(message) = &self.remux_failure {
            tokio::fs::write(output, b"partial").await?;
            return Err(Error::upstream(REMUX_TOOL, message.clone()));
        }

        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}
