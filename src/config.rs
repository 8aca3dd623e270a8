use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::video::TrimMode;
use crate::{BotError, Result};

/// Configuration for the Movie Clip Bot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chat platform settings
    pub telegram: TelegramConfig,

    /// Movie database settings
    pub metadata: MetadataConfig,

    /// Ephemeral file storage settings
    pub storage: StorageConfig,

    /// Clip trimming settings
    pub trim: TrimConfig,

    /// Trailer download settings
    pub trailer: TrailerConfig,

    /// Event dispatch settings
    pub dispatch: DispatchConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather
    pub token: Option<String>,

    /// Bot API base URL
    pub api_base: String,

    /// Long polling timeout for getUpdates (seconds)
    pub poll_timeout_seconds: u64,

    /// Timeout for regular API requests (seconds)
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// TMDB API key
    pub api_key: Option<String>,

    /// TMDB API base URL
    pub api_base: String,

    /// Base URL for poster images
    pub image_base: String,

    /// Language for titles and overviews
    pub language: String,

    /// Maximum number of candidates offered to the user
    pub max_results: usize,

    /// HTTP request timeout in seconds
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the ephemeral directories
    pub base_dir: PathBuf,

    /// Directory name for raw uploads
    pub uploads_dir: String,

    /// Directory name for trimmed outputs
    pub cuts_dir: String,

    /// Directory name for downloaded trailers
    pub trailers_dir: String,

    /// Largest accepted upload in bytes (0 = no limit)
    pub max_upload_bytes: u64,

    /// Delete leftover files from a previous run at startup
    pub sweep_on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: PathBuf,

    /// Length of the excerpt in seconds
    pub clip_duration_seconds: u64,

    /// Stream copy or re-encode
    pub mode: TrimMode,

    /// Wall-clock limit for one ffmpeg run (seconds)
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailerConfig {
    /// Send trailers after a movie is selected
    pub enabled: bool,

    /// Path to the yt-dlp binary
    pub ytdlp_path: PathBuf,

    /// Wall-clock limit for one download (seconds)
    pub timeout_seconds: u64,

    /// Maximum trailer size in megabytes
    pub max_filesize_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Events handled concurrently
    pub max_concurrent_events: usize,

    /// Pause after a failed poll (seconds)
    pub poll_backoff_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive
    pub log_level: String,
}

impl StorageConfig {
    pub fn uploads_path(&self) -> PathBuf {
        self.base_dir.join(&self.uploads_dir)
    }

    pub fn cuts_path(&self) -> PathBuf {
        self.base_dir.join(&self.cuts_dir)
    }

    pub fn trailers_path(&self) -> PathBuf {
        self.base_dir.join(&self.trailers_dir)
    }
}

impl TrimConfig {
    pub fn clip_duration(&self) -> Duration {
        Duration::from_secs(self.clip_duration_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Config {
    /// Load configuration from the first config file found, then apply
    /// environment overrides
    pub fn load() -> Result<Self> {
        let config_paths = [
            "movie-clip-bot.toml",
            "config/movie-clip-bot.toml",
            "/etc/movie-clip-bot/config.toml",
        ];

        let mut config = None;
        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(parsed) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        config = Some(parsed);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        let mut config = config.unwrap_or_default();
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from an explicit file, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&config_str)
            .map_err(|e| BotError::Configuration(format!("{}: {}", path.display(), e)))?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(token) = std::env::var("TELEGRAM_TOKEN") {
            self.telegram.token = Some(token);
        }

        if let Ok(api_key) = std::env::var("TMDB_API_KEY") {
            self.metadata.api_key = Some(api_key);
        }

        if let Ok(tmp_dir) = std::env::var("TMPDIR") {
            self.storage.base_dir = PathBuf::from(tmp_dir);
        }

        if let Ok(log_level) = std::env::var("CLIP_BOT_LOG_LEVEL") {
            self.logging.log_level = log_level;
        }

        if let Ok(ffmpeg) = std::env::var("CLIP_BOT_FFMPEG") {
            self.trim.ffmpeg_path = PathBuf::from(ffmpeg);
        }

        if let Ok(trailers) = std::env::var("CLIP_BOT_TRAILERS") {
            self.trailer.enabled =
                matches!(trailers.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| BotError::Configuration(e.to_string()))?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.telegram.token.as_deref().map_or(true, str::is_empty) {
            return Err(BotError::Configuration("TELEGRAM_TOKEN is not set".to_string()));
        }

        if self.metadata.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(BotError::Configuration("TMDB_API_KEY is not set".to_string()));
        }

        if self.trim.clip_duration_seconds == 0 {
            return Err(BotError::Configuration(
                "clip_duration_seconds must be greater than 0".to_string(),
            ));
        }

        if self.trim.timeout_seconds == 0 || self.trailer.timeout_seconds == 0 {
            return Err(BotError::Configuration("tool timeouts must be greater than 0".to_string()));
        }

        if self.dispatch.max_concurrent_events == 0 {
            return Err(BotError::Configuration(
                "max_concurrent_events must be greater than 0".to_string(),
            ));
        }

        if self.metadata.max_results == 0 {
            return Err(BotError::Configuration("max_results must be greater than 0".to_string()));
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Movie Clip Bot Configuration:\n\
            - Uploads Directory: {}\n\
            - Cuts Directory: {}\n\
            - Clip Duration: {}s ({:?})\n\
            - Trim Timeout: {}s\n\
            - Trailers Enabled: {}\n\
            - Metadata Language: {}\n\
            - Concurrent Events: {}",
            self.storage.uploads_path().display(),
            self.storage.cuts_path().display(),
            self.trim.clip_duration_seconds,
            self.trim.mode,
            self.trim.timeout_seconds,
            self.trailer.enabled,
            self.metadata.language,
            self.dispatch.max_concurrent_events
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig {
                token: None,
                api_base: "https://api.telegram.org".to_string(),
                poll_timeout_seconds: 30,
                request_timeout_seconds: 60,
            },
            metadata: MetadataConfig {
                api_key: None,
                api_base: "https://api.themoviedb.org/3".to_string(),
                image_base: "https://image.tmdb.org/t/p/w500".to_string(),
                language: "en-US".to_string(),
                max_results: 10,
                request_timeout_seconds: 15,
            },
            storage: StorageConfig {
                base_dir: std::env::temp_dir(),
                uploads_dir: "videos".to_string(),
                cuts_dir: "cuts".to_string(),
                trailers_dir: "trailers".to_string(),
                max_upload_bytes: 20 * 1024 * 1024, // Bot API download limit
                sweep_on_start: true,
            },
            trim: TrimConfig {
                ffmpeg_path: PathBuf::from("ffmpeg"),
                clip_duration_seconds: 120, // 2 minute excerpt
                mode: TrimMode::StreamCopy,
                timeout_seconds: 300,
            },
            trailer: TrailerConfig {
                enabled: false,
                ytdlp_path: PathBuf::from("yt-dlp"),
                timeout_seconds: 180,
                max_filesize_mb: 50, // Bot API upload limit
            },
            dispatch: DispatchConfig {
                max_concurrent_events: num_cpus::get().min(8),
                poll_backoff_seconds: 5,
            },
            logging: LoggingConfig {
                log_level: "movie_clip_bot=info,warn".to_string(),
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.config.telegram.token = Some(token.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.metadata.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_dir(mut self, dir: PathBuf) -> Self {
        self.config.storage.base_dir = dir;
        self
    }

    pub fn with_clip_duration(mut self, seconds: u64) -> Self {
        self.config.trim.clip_duration_seconds = seconds;
        self
    }

    pub fn with_trim_mode(mut self, mode: TrimMode) -> Self {
        self.config.trim.mode = mode;
        self
    }

    pub fn with_ffmpeg_path(mut self, path: PathBuf) -> Self {
        self.config.trim.ffmpeg_path = path;
        self
    }

    pub fn enable_trailers(mut self, enable: bool) -> Self {
        self.config.trailer.enabled = enable;
        self
    }

    pub fn with_max_concurrent_events(mut self, events: usize) -> Self {
        self.config.dispatch.max_concurrent_events = events;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
