/// Movie Clip Bot - Rust Implementation
///
/// Chat bot that looks up movies, sends posters and trailers, and trims
/// short excerpts out of videos uploaded by users.

pub mod config;
pub mod dispatcher;
pub mod handlers;
pub mod metadata;
pub mod state;
pub mod storage;
pub mod trailer;
pub mod transport;
pub mod video;

use std::fmt;

use serde::{Deserialize, Serialize};

// Re-export main types for easy access
pub use crate::config::Config;
pub use crate::dispatcher::Dispatcher;
pub use crate::handlers::{ClipWorkflow, CleanupReport};
pub use crate::metadata::{MetadataLookup, MovieCandidate, MovieDetail, TrailerCandidate};
pub use crate::state::{PendingOperation, Session, SessionStore, WorkflowStage};
pub use crate::storage::MediaStorage;
pub use crate::trailer::{TrailerFetcher, YtDlpFetcher};
pub use crate::transport::{ChatTransport, EventKind, InboundEvent, MediaRef};
pub use crate::video::{FfmpegTrimmer, TrimMode, TrimRequest, TrimTool};

/// Result type for bot operations
pub type Result<T> = std::result::Result<T, BotError>;

/// Error types for bot operations
#[derive(thiserror::Error, Debug)]
pub enum BotError {
    #[error("Metadata lookup unavailable: {0}")]
    LookupUnavailable(String),

    #[error("Session state error: {0}")]
    SessionState(String),

    #[error("Trim failed: {0}")]
    TrimExecution(String),

    #[error("Upload rejected: {0}")]
    UploadRejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl BotError {
    /// Chat reply shown to the user when a handler fails with this error
    pub fn user_message(&self) -> String {
        match self {
            BotError::LookupUnavailable(_) => "Nothing found 😢".to_string(),
            BotError::SessionState(reason) => {
                format!("{}. Send me a movie title to start over 🎥", reason)
            }
            BotError::TrimExecution(diagnostic) => format!("Trim error: {}", diagnostic),
            BotError::UploadRejected(reason) => format!("Upload rejected: {}", reason),
            BotError::Io(_) => {
                "A file operation on the server failed, please try again".to_string()
            }
            BotError::Http(_) | BotError::Json(_) | BotError::Transport(_) => {
                "Something went wrong talking to the chat service, please try again".to_string()
            }
            BotError::Configuration(_) => {
                "The bot is misconfigured, please contact the operator".to_string()
            }
        }
    }
}

/// Chat platform identity of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation a reply is sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
