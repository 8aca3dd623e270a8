pub mod telegram;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{ChatId, Result, UserId};

pub use telegram::TelegramTransport;

/// Uploaded file as announced by the chat platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<u64>,
}

/// What the user did
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// `/name args`
    Command { name: String, args: String },

    /// Free text that is not a command
    Text(String),

    /// Uploaded video
    Media(MediaRef),

    /// Press on an inline choice button
    Selection { callback_id: String, data: String },
}

/// One inbound chat event
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub user: UserId,
    pub chat: ChatId,
    pub kind: EventKind,
}

/// Inline choice button
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub data: String,
}

/// Chat platform connection used by the workflow
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Wait for the next batch of inbound events
    async fn next_events(&self) -> Result<Vec<InboundEvent>>;

    async fn send_text(&self, chat: ChatId, text: &str) -> Result<()>;

    /// Text with one inline button per choice
    async fn send_choices(&self, chat: ChatId, text: &str, choices: &[Choice]) -> Result<()>;

    async fn send_photo(&self, chat: ChatId, photo_url: &str, caption: &str) -> Result<()>;

    /// Upload a local video file
    async fn send_video(&self, chat: ChatId, path: &Path) -> Result<()>;

    /// Transfer uploaded media into `dest`, returning the number of bytes written
    async fn download_media(&self, media: &MediaRef, dest: &Path) -> Result<u64>;

    /// Confirm a button press so the client stops its spinner
    async fn acknowledge(&self, callback_id: &str) -> Result<()>;
}
