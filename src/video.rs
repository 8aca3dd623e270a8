use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::TrimConfig;
use crate::{BotError, Result};

/// How the excerpt is cut out of the source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrimMode {
    /// Copy streams without re-encoding. Fast, but cut points snap to keyframes.
    StreamCopy,

    /// Re-encode to H.264/AAC for frame-accurate cuts
    Reencode,
}

/// One trim invocation
#[derive(Debug, Clone)]
pub struct TrimRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Start offset as given by the user, passed to the tool unchanged
    pub start: String,
    pub duration: Duration,
    pub mode: TrimMode,
}

/// External clip extraction tool
#[async_trait]
pub trait TrimTool: Send + Sync {
    /// Cut `request.duration` starting at `request.start` into `request.output`
    async fn trim(&self, request: &TrimRequest) -> Result<PathBuf>;
}

/// Trimmer backed by the ffmpeg command line
#[derive(Debug, Clone)]
pub struct FfmpegTrimmer {
    program: PathBuf,
    timeout: Duration,
}

impl FfmpegTrimmer {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &TrimConfig) -> Self {
        Self::new(config.ffmpeg_path.clone(), config.timeout())
    }

    /// Build the ffmpeg argument list for a request
    pub fn build_args(request: &TrimRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            // Input seeking: fast, and with stream copy lands on a keyframe
            "-ss".into(),
            request.start.clone().into(),
            "-i".into(),
            request.input.clone().into_os_string(),
            "-t".into(),
            format_timecode(request.duration).into(),
        ];

        match request.mode {
            TrimMode::StreamCopy => {
                args.extend(["-c", "copy"].map(OsString::from));
            }
            TrimMode::Reencode => {
                args.extend(
                    ["-c:v", "libx264", "-preset", "veryfast", "-c:a", "aac"].map(OsString::from),
                );
            }
        }

        args.push("-y".into()); // Overwrite output file
        args.push(request.output.clone().into_os_string());
        args
    }
}

#[async_trait]
impl TrimTool for FfmpegTrimmer {
    async fn trim(&self, request: &TrimRequest) -> Result<PathBuf> {
        if !tokio::fs::try_exists(&request.input).await.unwrap_or(false) {
            return Err(BotError::TrimExecution(format!(
                "{}: No such file or directory",
                request.input.display()
            )));
        }

        info!(
            "✂️ Trimming {} from {} for {} ({:?})",
            request.input.display(),
            request.start,
            format_timecode(request.duration),
            request.mode
        );

        let start_time = Instant::now();
        let child = tokio::process::Command::new(&self.program)
            .args(Self::build_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => BotError::TrimExecution(format!(
                    "trim tool not found: {}",
                    self.program.display()
                )),
                _ => BotError::TrimExecution(format!(
                    "failed to start {}: {}",
                    self.program.display(),
                    e
                )),
            })?;

        // Dropping the wait future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| BotError::TrimExecution(e.to_string()))?,
            Err(_) => {
                warn!(
                    "Trim timed out after {}s: {}",
                    self.timeout.as_secs(),
                    request.input.display()
                );
                return Err(BotError::TrimExecution(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let diagnostic = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let diagnostic = if diagnostic.is_empty() {
                format!("{} exited with {}", self.program.display(), output.status)
            } else {
                diagnostic
            };
            return Err(BotError::TrimExecution(diagnostic));
        }

        if !tokio::fs::try_exists(&request.output).await.unwrap_or(false) {
            return Err(BotError::TrimExecution(format!(
                "{} produced no output file",
                self.program.display()
            )));
        }

        debug!("Trim finished in {:.2}s", start_time.elapsed().as_secs_f64());
        info!("✅ Excerpt written: {}", request.output.display());
        Ok(request.output.clone())
    }
}

/// Format a duration as `HH:MM:SS`
pub fn format_timecode(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Whether free text looks like an `H:MM:SS` timecode
pub fn looks_like_timecode(text: &str) -> bool {
    use std::sync::OnceLock;
    static TIMECODE: OnceLock<regex::Regex> = OnceLock::new();
    let pattern = TIMECODE.get_or_init(|| {
        regex::Regex::new(r"^\d{1,2}:\d{2}:\d{2}(\.\d+)?$").expect("valid timecode pattern")
    });
    pattern.is_match(text.trim())
}
