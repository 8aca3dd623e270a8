use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::StorageConfig;
use crate::{Result, UserId};

/// Ephemeral on-disk layout for uploads, cuts and trailers
///
/// Every user owns exactly one slot per directory; a newer file for the
/// same user overwrites the older one.
#[derive(Debug, Clone)]
pub struct MediaStorage {
    uploads_dir: PathBuf,
    cuts_dir: PathBuf,
    trailers_dir: PathBuf,
}

impl MediaStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            uploads_dir: config.uploads_path(),
            cuts_dir: config.cuts_path(),
            trailers_dir: config.trailers_path(),
        }
    }

    /// Storage rooted at a single directory with the default layout
    pub fn under(base_dir: &Path) -> Self {
        Self {
            uploads_dir: base_dir.join("videos"),
            cuts_dir: base_dir.join("cuts"),
            trailers_dir: base_dir.join("trailers"),
        }
    }

    /// Create all storage directories
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in self.dirs() {
            fs::create_dir_all(dir).await?;
        }
        debug!("📁 Storage directories ready under {}", self.uploads_dir.display());
        Ok(())
    }

    pub fn upload_path(&self, user: UserId) -> PathBuf {
        self.uploads_dir.join(format!("{}.mp4", user))
    }

    pub fn cut_path(&self, user: UserId) -> PathBuf {
        self.cuts_dir.join(format!("{}_cut.mp4", user))
    }

    pub fn trailer_path(&self, user: UserId) -> PathBuf {
        self.trailers_dir.join(format!("{}_trailer.mp4", user))
    }

    /// Per-operation sibling of `path` the operation writes to before it is
    /// renamed into place. Keeps the `.mp4` extension for ffmpeg.
    pub fn staging_path(&self, path: &Path, token: u64) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!("{}.{}.part.mp4", stem, token))
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn cuts_dir(&self) -> &Path {
        &self.cuts_dir
    }

    /// Delete a file. Returns whether something was deleted; a missing file is not an error.
    pub async fn remove_if_exists(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!("🗑️ Removed {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete files left behind by a previous run
    ///
    /// Sessions live in memory only, so after a restart nothing references
    /// these files any more.
    pub async fn sweep(&self) -> Result<usize> {
        let mut removed = 0;

        for dir in self.dirs() {
            if !dir.exists() {
                continue;
            }

            for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Failed to read entry in {}: {}", dir.display(), e);
                        continue;
                    }
                };

                if !entry.file_type().is_file() {
                    continue;
                }

                match self.remove_if_exists(entry.path()).await {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to remove stale file {}: {}", entry.path().display(), e)
                    }
                }
            }
        }

        if removed > 0 {
            info!("🧹 Swept {} stale media files", removed);
        }

        Ok(removed)
    }

    fn dirs(&self) -> [&Path; 3] {
        [&self.uploads_dir, &self.cuts_dir, &self.trailers_dir]
    }
}
