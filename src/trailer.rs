use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::TrailerConfig;
use crate::{BotError, Result};

/// Best-effort trailer downloader
#[async_trait]
pub trait TrailerFetcher: Send + Sync {
    /// Download `video_url` into `dest`
    async fn fetch(&self, video_url: &str, dest: &Path) -> Result<PathBuf>;
}

/// Downloader backed by the yt-dlp command line
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: PathBuf,
    timeout: Duration,
    max_filesize_mb: u64,
}

impl YtDlpFetcher {
    pub fn new(config: &TrailerConfig) -> Self {
        Self {
            program: config.ytdlp_path.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            max_filesize_mb: config.max_filesize_mb,
        }
    }

    pub fn build_args(&self, video_url: &str, dest: &Path) -> Vec<OsString> {
        vec![
            "--no-playlist".into(),
            "--quiet".into(),
            "--no-warnings".into(),
            // Single-file mp4 so the chat client can play it inline
            "-f".into(),
            "best[ext=mp4]/best".into(),
            "--max-filesize".into(),
            format!("{}M", self.max_filesize_mb).into(),
            "--force-overwrites".into(),
            "-o".into(),
            dest.as_os_str().to_os_string(),
            video_url.into(),
        ]
    }
}

#[async_trait]
impl TrailerFetcher for YtDlpFetcher {
    async fn fetch(&self, video_url: &str, dest: &Path) -> Result<PathBuf> {
        info!("🎞️ Downloading trailer {}", video_url);

        let child = tokio::process::Command::new(&self.program)
            .args(self.build_args(video_url, dest))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("Trailer download timed out after {}s", self.timeout.as_secs());
                return Err(BotError::Transport(format!(
                    "trailer download timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BotError::Transport(format!(
                "trailer download failed: {}",
                stderr.trim()
            )));
        }

        // yt-dlp exits 0 when --max-filesize skips the download
        if !tokio::fs::try_exists(dest).await.unwrap_or(false) {
            return Err(BotError::Transport("trailer exceeds the size limit".to_string()));
        }

        info!("✅ Trailer saved: {}", dest.display());
        Ok(dest.to_path_buf())
    }
}
