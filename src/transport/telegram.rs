//! Telegram Bot API transport over long polling

use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{ChatTransport, Choice, EventKind, InboundEvent, MediaRef};
use crate::config::TelegramConfig;
use crate::{BotError, ChatId, Result, UserId};

/// Telegram Bot API client
pub struct TelegramTransport {
    api_base: String,
    token: String,
    poll_timeout: Duration,
    client: reqwest::Client,
    next_offset: AtomicI64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Update {
    update_id: i64,
    message: Option<Message>,
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct Message {
    from: Option<User>,
    chat: Chat,
    text: Option<String>,
    video: Option<FileInfo>,
    document: Option<FileInfo>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    message: Option<CallbackMessage>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackMessage {
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    file_id: String,
    file_name: Option<String>,
    mime_type: Option<String>,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    file_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup<'a> {
    inline_keyboard: Vec<Vec<InlineKeyboardButton<'a>>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

impl TelegramTransport {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                BotError::Configuration("Telegram bot token not configured".to_string())
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            poll_timeout: Duration::from_secs(config.poll_timeout_seconds),
            client,
            next_offset: AtomicI64::new(0),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    async fn read_response<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let body: ApiResponse<T> = response.json().await.map_err(|e| scrub(method, e))?;

        if !body.ok {
            return Err(BotError::Transport(format!(
                "{} failed: {}",
                method,
                body.description.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        body.result
            .ok_or_else(|| BotError::Transport(format!("{} returned no result", method)))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<T> {
        debug!("Calling Telegram {}", method);
        let response = self
            .client
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await
            .map_err(|e| scrub(method, e))?;

        Self::read_response(method, response).await
    }
}

/// Strip the request URL from HTTP errors; it carries the bot token
fn scrub(method: &str, error: reqwest::Error) -> BotError {
    BotError::Transport(format!("{}: {}", method, error.without_url()))
}

/// Translate a raw update into an inbound event. Updates the bot does not act on yield `None`.
pub(crate) fn parse_update(update: Update) -> Option<InboundEvent> {
    if let Some(query) = update.callback_query {
        let chat = query.message.map(|m| m.chat.id).unwrap_or(query.from.id);
        return Some(InboundEvent {
            user: UserId(query.from.id),
            chat: ChatId(chat),
            kind: EventKind::Selection {
                callback_id: query.id,
                data: query.data.unwrap_or_default(),
            },
        });
    }

    let message = update.message?;
    let user = UserId(message.from.as_ref().map_or(message.chat.id, |u| u.id));
    let chat = ChatId(message.chat.id);

    let kind = if let Some(video) = message.video {
        EventKind::Media(video.into())
    } else if let Some(document) = message
        .document
        .filter(|d| d.mime_type.as_deref().is_some_and(|m| m.starts_with("video/")))
    {
        EventKind::Media(document.into())
    } else {
        let text = message.text?;
        match text.strip_prefix('/') {
            Some(command) => {
                let (head, args) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
                // "/start@my_bot" in group chats
                let name = head.split('@').next().unwrap_or(head).to_lowercase();
                EventKind::Command {
                    name,
                    args: args.trim().to_string(),
                }
            }
            None => EventKind::Text(text),
        }
    };

    Some(InboundEvent { user, chat, kind })
}

impl From<FileInfo> for MediaRef {
    fn from(file: FileInfo) -> Self {
        MediaRef {
            file_id: file.file_id,
            file_name: file.file_name,
            mime_type: file.mime_type,
            file_size: file.file_size,
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn next_events(&self) -> Result<Vec<InboundEvent>> {
        let offset = self.next_offset.load(Ordering::SeqCst);
        let payload = serde_json::json!({
            "offset": offset,
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ["message", "callback_query"],
        });

        let response = self
            .client
            .post(self.method_url("getUpdates"))
            .json(&payload)
            // Long poll outlives the regular request timeout
            .timeout(self.poll_timeout + Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| scrub("getUpdates", e))?;

        let updates: Vec<Update> = Self::read_response("getUpdates", response).await?;

        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.next_offset.store(last + 1, Ordering::SeqCst);
        }

        let events: Vec<InboundEvent> = updates.into_iter().filter_map(parse_update).collect();
        if !events.is_empty() {
            debug!("📨 Received {} events", events.len());
        }
        Ok(events)
    }

    async fn send_text(&self, chat: ChatId, text: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call("sendMessage", &serde_json::json!({ "chat_id": chat.0, "text": text }))
            .await?;
        Ok(())
    }

    async fn send_choices(&self, chat: ChatId, text: &str, choices: &[Choice]) -> Result<()> {
        let markup = InlineKeyboardMarkup {
            inline_keyboard: choices
                .iter()
                .map(|choice| {
                    vec![InlineKeyboardButton {
                        text: &choice.label,
                        callback_data: &choice.data,
                    }]
                })
                .collect(),
        };

        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &serde_json::json!({ "chat_id": chat.0, "text": text, "reply_markup": markup }),
            )
            .await?;
        Ok(())
    }

    async fn send_photo(&self, chat: ChatId, photo_url: &str, caption: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "sendPhoto",
                &serde_json::json!({ "chat_id": chat.0, "photo": photo_url, "caption": caption }),
            )
            .await?;
        Ok(())
    }

    async fn send_video(&self, chat: ChatId, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "video.mp4".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("video/mp4")
            .map_err(|e| scrub("sendVideo", e))?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat.0.to_string())
            .text("supports_streaming", "true")
            .part("video", part);

        let response = self
            .client
            .post(self.method_url("sendVideo"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| scrub("sendVideo", e))?;

        let _: serde_json::Value = Self::read_response("sendVideo", response).await?;
        Ok(())
    }

    async fn download_media(&self, media: &MediaRef, dest: &Path) -> Result<u64> {
        let remote: RemoteFile = self
            .call("getFile", &serde_json::json!({ "file_id": media.file_id }))
            .await?;
        let file_path = remote
            .file_path
            .ok_or_else(|| BotError::Transport("getFile returned no file path".to_string()))?;

        let response = self
            .client
            .get(self.file_url(&file_path))
            .send()
            .await
            .map_err(|e| scrub("download", e))?;

        if !response.status().is_success() {
            return Err(BotError::Transport(format!("download failed with {}", response.status())));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| scrub("download", e))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if let Some(expected) = media.file_size {
            if expected != written {
                warn!("Downloaded {} bytes, expected {}", written, expected);
            }
        }

        Ok(written)
    }

    async fn acknowledge(&self, callback_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "answerCallbackQuery",
                &serde_json::json!({ "callback_query_id": callback_id }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    fn parse(json: &str) -> Option<InboundEvent> {
        let update: Update = serde_json::from_str(json).unwrap();
        parse_update(update)
    }

    #[test]
    fn test_transport_requires_token() {
        let config = Config::default().telegram;
        assert!(matches!(TelegramTransport::new(&config), Err(BotError::Configuration(_))));
    }

    #[test]
    fn test_urls() {
        let mut config = Config::default().telegram;
        config.token = Some("123:abc".to_string());
        let transport = TelegramTransport::new(&config).unwrap();

        assert_eq!(transport.method_url("getMe"), "https://api.telegram.org/bot123:abc/getMe");
        assert_eq!(
            transport.file_url("videos/file_1.mp4"),
            "https://api.telegram.org/file/bot123:abc/videos/file_1.mp4"
        );
    }

    #[test]
    fn test_parse_text_message() {
        let event = parse(
            r#"{"update_id": 1, "message": {"message_id": 5, "from": {"id": 42}, "chat": {"id": 42}, "text": "Inception"}}"#,
        )
        .unwrap();

        assert_eq!(event.user, UserId(42));
        assert_eq!(event.chat, ChatId(42));
        assert_eq!(event.kind, EventKind::Text("Inception".to_string()));
    }

    #[test]
    fn test_parse_command_with_bot_suffix() {
        let event = parse(
            r#"{"update_id": 2, "message": {"from": {"id": 1}, "chat": {"id": -100}, "text": "/Delete@clip_bot now"}}"#,
        )
        .unwrap();

        assert_eq!(
            event.kind,
            EventKind::Command {
                name: "delete".to_string(),
                args: "now".to_string()
            }
        );
        assert_eq!(event.chat, ChatId(-100));
    }

    #[test]
    fn test_parse_video_and_video_document() {
        let event = parse(
            r#"{"update_id": 3, "message": {"from": {"id": 1}, "chat": {"id": 1},
                "video": {"file_id": "BAAC", "file_size": 1024, "mime_type": "video/mp4"}}}"#,
        )
        .unwrap();
        match event.kind {
            EventKind::Media(media) => {
                assert_eq!(media.file_id, "BAAC");
                assert_eq!(media.file_size, Some(1024));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let event = parse(
            r#"{"update_id": 4, "message": {"from": {"id": 1}, "chat": {"id": 1},
                "document": {"file_id": "DOC", "file_name": "clip.mkv", "mime_type": "video/x-matroska"}}}"#,
        )
        .unwrap();
        assert!(matches!(event.kind, EventKind::Media(media) if media.file_id == "DOC"));
    }

    #[test]
    fn test_parse_ignores_non_video_documents() {
        let event = parse(
            r#"{"update_id": 5, "message": {"from": {"id": 1}, "chat": {"id": 1},
                "document": {"file_id": "PDF", "mime_type": "application/pdf"}}}"#,
        );
        assert!(event.is_none());
    }

    #[test]
    fn test_parse_callback_query() {
        let event = parse(
            r#"{"update_id": 6, "callback_query": {"id": "cb1", "from": {"id": 42},
                "message": {"chat": {"id": 42}}, "data": "movie_27205"}}"#,
        )
        .unwrap();

        assert_eq!(
            event.kind,
            EventKind::Selection {
                callback_id: "cb1".to_string(),
                data: "movie_27205".to_string()
            }
        );
    }

    #[test]
    fn test_inline_keyboard_shape() {
        let choices = vec![
            Choice { label: "Inception (2010)".to_string(), data: "movie_27205".to_string() },
            Choice { label: "Other (????)".to_string(), data: "movie_1".to_string() },
        ];
        let markup = InlineKeyboardMarkup {
            inline_keyboard: choices
                .iter()
                .map(|c| vec![InlineKeyboardButton { text: &c.label, callback_data: &c.data }])
                .collect(),
        };

        let json = serde_json::to_value(&markup).unwrap();
        assert_eq!(json["inline_keyboard"][1][0]["callback_data"], "movie_1");
        assert_eq!(json["inline_keyboard"].as_array().unwrap().len(), 2);
    }
}
