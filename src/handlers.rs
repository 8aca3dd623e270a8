//! Chat workflow handlers
//!
//! Each handler takes the per-user session lock only to validate and commit
//! a stage change. Slow work (media transfer, ffmpeg, trailer download) runs
//! after the session has been marked with a pending operation and the lock
//! has been released; the result is committed in a second short critical
//! section that re-checks the session is still the one the work started for.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::metadata::{MetadataLookup, MovieCandidate, MovieDetail};
use crate::state::{PendingOperation, Session, SessionStore, WorkflowStage};
use crate::storage::MediaStorage;
use crate::trailer::TrailerFetcher;
use crate::transport::{ChatTransport, Choice, EventKind, InboundEvent, MediaRef};
use crate::video::{looks_like_timecode, TrimMode, TrimRequest, TrimTool};
use crate::{BotError, ChatId, Result, UserId};

const GREETING: &str = "Hi! Send me a movie title 🎥";
const CHOOSE_PROMPT: &str = "Choose an option:";
const NOTHING_FOUND: &str = "Nothing found 😢";
const EMPTY_QUERY: &str = "Send me a movie title to search for 🎥";
const TIMECODE_PROMPT: &str = "Send the start timecode of the excerpt in the format 00:01:30";
const TRIM_DONE: &str = "Done ✅ To delete the videos from the server, send /delete";
const CLEANUP_DONE: &str = "The video and the excerpt were deleted from the server ✅";
const CANCELLED: &str = "Cancelled.";
const UNKNOWN_COMMAND: &str = "Unknown command. Send a movie title, /cancel or /delete";

/// Telegram caption limit in characters
const MAX_CAPTION_CHARS: usize = 1024;

/// Prefix of inline choice payloads
const SELECTION_PREFIX: &str = "movie_";

/// Tunables of the workflow
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub clip_duration: Duration,
    pub trim_mode: TrimMode,
    /// Largest accepted upload in bytes (0 = no limit)
    pub max_upload_bytes: u64,
    pub max_results: usize,
}

impl WorkflowSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            clip_duration: config.trim.clip_duration(),
            trim_mode: config.trim.mode,
            max_upload_bytes: config.storage.max_upload_bytes,
            max_results: config.metadata.max_results,
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Outcome of a `/delete`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// A session existed and was removed
    pub session_cleared: bool,
    /// Files actually deleted from disk
    pub files_removed: usize,
}

/// Search, selection, upload, trim and cleanup handlers sharing one session store
pub struct ClipWorkflow {
    sessions: SessionStore,
    storage: MediaStorage,
    transport: Arc<dyn ChatTransport>,
    metadata: Arc<dyn MetadataLookup>,
    trimmer: Arc<dyn TrimTool>,
    trailers: Option<Arc<dyn TrailerFetcher>>,
    settings: WorkflowSettings,
    operations: AtomicU64,
}

impl ClipWorkflow {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        metadata: Arc<dyn MetadataLookup>,
        trimmer: Arc<dyn TrimTool>,
        storage: MediaStorage,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            sessions: SessionStore::new(),
            storage,
            transport,
            metadata,
            trimmer,
            trailers: None,
            settings,
            operations: AtomicU64::new(0),
        }
    }

    /// Enable best-effort trailer delivery after a selection
    pub fn with_trailers(mut self, fetcher: Arc<dyn TrailerFetcher>) -> Self {
        self.trailers = Some(fetcher);
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn storage(&self) -> &MediaStorage {
        &self.storage
    }

    pub fn transport(&self) -> &Arc<dyn ChatTransport> {
        &self.transport
    }

    /// Handle one inbound event. Every failure ends up as a chat reply.
    pub async fn handle_event(&self, event: InboundEvent) {
        let InboundEvent { user, chat, kind } = event;

        let result = match kind {
            EventKind::Command { name, .. } => match name.as_str() {
                "start" | "help" => self.start(chat).await,
                "cancel" => self.cancel(user, chat).await,
                "delete" => self.cleanup(user, chat).await.map(|_| ()),
                other => {
                    debug!("Unknown command /{} from user {}", other, user);
                    self.transport.send_text(chat, UNKNOWN_COMMAND).await
                }
            },
            EventKind::Text(text) => self.route_text(user, chat, &text).await,
            EventKind::Media(media) => self.ingest_media(user, chat, &media).await.map(|_| ()),
            EventKind::Selection { callback_id, data } => {
                if let Err(e) = self.transport.acknowledge(&callback_id).await {
                    debug!("Failed to acknowledge callback {}: {}", callback_id, e);
                }
                self.select(user, chat, &data).await.map(|_| ())
            }
        };

        if let Err(e) = result {
            self.report(user, chat, e).await;
        }
    }

    async fn report(&self, user: UserId, chat: ChatId, err: BotError) {
        match &err {
            BotError::SessionState(reason) => info!("↩️ User {}: {}", user, reason),
            BotError::LookupUnavailable(reason) => {
                warn!("🔍 Lookup failed for user {}: {}", user, reason)
            }
            BotError::TrimExecution(diagnostic) => {
                warn!("✂️ Trim failed for user {}: {}", user, diagnostic)
            }
            other => error!("❌ Handler failed for user {}: {}", user, other),
        }

        if let Err(e) = self.transport.send_text(chat, &err.user_message()).await {
            error!("Failed to report error to chat {}: {}", chat, e);
        }
    }

    async fn route_text(&self, user: UserId, chat: ChatId, text: &str) -> Result<()> {
        let awaiting_timecode = matches!(
            self.sessions.get(user).await,
            Some(session) if session.stage == WorkflowStage::AwaitingTimecode
        );

        if awaiting_timecode || looks_like_timecode(text) {
            self.apply_timecode(user, chat, text).await.map(|_| ())
        } else {
            self.search(chat, text).await.map(|_| ())
        }
    }

    /// `/start`
    pub async fn start(&self, chat: ChatId) -> Result<()> {
        self.transport.send_text(chat, GREETING).await
    }

    /// Free-text query: offer matching titles as inline choices
    pub async fn search(&self, chat: ChatId, query: &str) -> Result<Vec<MovieCandidate>> {
        let query = query.trim();
        if query.is_empty() {
            self.transport.send_text(chat, EMPTY_QUERY).await?;
            return Ok(Vec::new());
        }

        let mut candidates = self.metadata.search(query).await?;
        candidates.truncate(self.settings.max_results);
        info!("🔍 {} candidates for {:?}", candidates.len(), query);

        if candidates.is_empty() {
            self.transport.send_text(chat, NOTHING_FOUND).await?;
            return Ok(candidates);
        }

        let choices: Vec<Choice> = candidates
            .iter()
            .map(|candidate| Choice {
                label: candidate.label(),
                data: format!("{}{}", SELECTION_PREFIX, candidate.id),
            })
            .collect();
        self.transport.send_choices(chat, CHOOSE_PROMPT, &choices).await?;

        Ok(candidates)
    }

    /// Inline selection: start a fresh session for the chosen movie
    pub async fn select(&self, user: UserId, chat: ChatId, data: &str) -> Result<Session> {
        let movie_id = parse_selection(data)
            .ok_or_else(|| BotError::SessionState("That choice is no longer valid".to_string()))?;

        let detail = self.metadata.detail(movie_id).await?;
        let session = Session::for_selection(detail.id, detail.title.clone());
        let session_id = session.id;

        // Superseded files are deleted under the lock; commits to the same paths take it too
        let mut slot = self.sessions.lock(user).await;
        if let Some(previous) = slot.replace(session.clone()) {
            debug!("Replacing session of user {} ({})", user, previous.stage.status_string());
            self.discard_artifacts(&previous).await;
        }
        drop(slot);
        info!("🎬 User {} selected {} ({})", user, detail.title, detail.id);

        let caption = selection_caption(&detail);
        match &detail.poster_url {
            Some(poster) => {
                if let Err(e) = self.transport.send_photo(chat, poster, &caption).await {
                    warn!("Failed to send poster for {}: {}", detail.id, e);
                    self.transport.send_text(chat, &caption).await?;
                }
            }
            None => self.transport.send_text(chat, &caption).await?,
        }

        self.deliver_trailer(user, chat, session_id, &detail).await;

        Ok(session)
    }

    async fn deliver_trailer(
        &self,
        user: UserId,
        chat: ChatId,
        session_id: u64,
        detail: &MovieDetail,
    ) {
        let Some(fetcher) = &self.trailers else {
            return;
        };
        let Some(url) = detail.best_trailer().and_then(|trailer| trailer.url()) else {
            debug!("No downloadable trailer for {}", detail.id);
            return;
        };

        if let Err(e) = self.storage.ensure_dirs().await {
            warn!("Trailer storage unavailable: {}", e);
            return;
        }

        let dest = self.storage.trailer_path(user);
        let staged = self.storage.staging_path(&dest, self.next_token());
        if let Err(e) = fetcher.fetch(&url, &staged).await {
            warn!("🎞️ Trailer unavailable for {}: {}", detail.id, e);
            let _ = self.storage.remove_if_exists(&staged).await;
            return;
        }

        let recorded = self
            .commit_staged(
                user,
                &staged,
                &dest,
                |session| session.id == session_id,
                |session| session.trailer_media_path = Some(dest.clone()),
            )
            .await;

        match recorded {
            Ok(true) => {
                if let Err(e) = self.transport.send_video(chat, &dest).await {
                    warn!("Failed to send trailer to chat {}: {}", chat, e);
                }
            }
            Ok(false) => debug!("Session of user {} moved on, dropping trailer", user),
            Err(e) => warn!("Failed to store trailer for {}: {}", detail.id, e),
        }
    }

    /// Media upload: store the video in the user's upload slot
    pub async fn ingest_media(
        &self,
        user: UserId,
        chat: ChatId,
        media: &MediaRef,
    ) -> Result<PathBuf> {
        let limit = self.settings.max_upload_bytes;
        let operation = PendingOperation::Upload(self.next_token());

        self.sessions
            .update(user, |slot| match slot {
                Some(session)
                    if session.stage == WorkflowStage::AwaitingVideo && session.pending.is_none() =>
                {
                    if let Some(size) = media.file_size.filter(|size| limit > 0 && *size > limit) {
                        return Err(BotError::UploadRejected(format!(
                            "the file is {} MB, the limit is {} MB",
                            megabytes(size),
                            megabytes(limit)
                        )));
                    }
                    session.pending = Some(operation);
                    session.touch();
                    Ok(())
                }
                Some(session) if matches!(session.pending, Some(PendingOperation::Upload(_))) => {
                    Err(BotError::SessionState("A video is already being uploaded".to_string()))
                }
                _ => Err(BotError::SessionState(
                    "No active selection, or upload sent out of order".to_string(),
                )),
            })
            .await?;

        let dest = self.storage.upload_path(user);
        let staged = self.storage.staging_path(&dest, operation.token());

        let transfer = async {
            self.storage.ensure_dirs().await?;
            self.transport.download_media(media, &staged).await
        }
        .await;

        let bytes = match transfer {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = self.storage.remove_if_exists(&staged).await;
                self.clear_pending(user, operation).await;
                return Err(e);
            }
        };

        let committed = self
            .commit_staged(
                user,
                &staged,
                &dest,
                |session| session.pending == Some(operation),
                |session| {
                    session.pending = None;
                    session.source_media_path = Some(dest.clone());
                    session.advance(WorkflowStage::AwaitingTimecode);
                },
            )
            .await;

        match committed {
            Ok(true) => {}
            Ok(false) => {
                return Err(BotError::SessionState(
                    "The selection changed while the video was uploading".to_string(),
                ))
            }
            Err(e) => {
                self.clear_pending(user, operation).await;
                return Err(e);
            }
        }

        info!("📥 Stored {} bytes for user {}: {}", bytes, user, dest.display());
        self.transport.send_text(chat, TIMECODE_PROMPT).await?;
        Ok(dest)
    }

    /// Timecode: cut the excerpt and send it back
    ///
    /// A finished session accepts another timecode; the new excerpt replaces the old one.
    pub async fn apply_timecode(
        &self,
        user: UserId,
        chat: ChatId,
        timecode: &str,
    ) -> Result<PathBuf> {
        let operation = PendingOperation::Trim(self.next_token());

        let source = self
            .sessions
            .update(user, |slot| match slot {
                Some(session) if session.pending.is_none() && accepts_timecode(session.stage) => {
                    match session.source_media_path.clone() {
                        Some(source) => {
                            session.pending = Some(operation);
                            session.touch();
                            Ok(source)
                        }
                        None => Err(BotError::SessionState(
                            "No uploaded video to trim".to_string(),
                        )),
                    }
                }
                Some(session) if matches!(session.pending, Some(PendingOperation::Trim(_))) => {
                    Err(BotError::SessionState("An excerpt is already being cut".to_string()))
                }
                Some(session) if matches!(session.pending, Some(PendingOperation::Upload(_))) => {
                    Err(BotError::SessionState("The video is still uploading".to_string()))
                }
                _ => Err(BotError::SessionState(
                    "No uploaded video to trim, send a video first".to_string(),
                )),
            })
            .await?;

        let dest = self.storage.cut_path(user);
        let request = TrimRequest {
            input: source,
            output: self.storage.staging_path(&dest, operation.token()),
            start: timecode.trim().to_string(),
            duration: self.settings.clip_duration,
            mode: self.settings.trim_mode,
        };

        let trimmed = async {
            self.storage.ensure_dirs().await?;
            self.trimmer.trim(&request).await
        }
        .await;

        if let Err(e) = trimmed {
            let _ = self.storage.remove_if_exists(&request.output).await;
            self.clear_pending(user, operation).await;
            return Err(e);
        }

        let committed = self
            .commit_staged(
                user,
                &request.output,
                &dest,
                |session| session.pending == Some(operation),
                |session| {
                    session.pending = None;
                    session.trimmed_media_path = Some(dest.clone());
                    session.advance(WorkflowStage::Done);
                },
            )
            .await;

        match committed {
            Ok(true) => {}
            Ok(false) => {
                return Err(BotError::SessionState(
                    "The session changed while the excerpt was being cut".to_string(),
                ))
            }
            Err(e) => {
                self.clear_pending(user, operation).await;
                return Err(e);
            }
        }

        info!("✂️ Excerpt ready for user {} from {}", user, request.start);
        self.transport.send_video(chat, &dest).await?;
        self.transport.send_text(chat, TRIM_DONE).await?;
        Ok(dest)
    }

    /// `/delete`: remove every file of the session and the session itself
    pub async fn cleanup(&self, user: UserId, chat: ChatId) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let mut failure = None;

        let mut slot = self.sessions.lock(user).await;
        if let Some(session) = slot.take() {
            report.session_cleared = true;
            for path in session.artifact_paths() {
                match self.storage.remove_if_exists(&path).await {
                    Ok(true) => report.files_removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Failed to delete {}: {}", path.display(), e);
                        failure.get_or_insert(e);
                    }
                }
            }
        }
        drop(slot);
        self.sessions.prune(user).await;

        if let Some(e) = failure {
            return Err(e);
        }

        info!(
            "🧹 Cleanup for user {}: session cleared={}, {} files removed",
            user, report.session_cleared, report.files_removed
        );
        self.transport.send_text(chat, CLEANUP_DONE).await?;
        Ok(report)
    }

    /// `/cancel`: leave the current step; files stay until `/delete`
    pub async fn cancel(&self, user: UserId, chat: ChatId) -> Result<()> {
        self.sessions
            .update(user, |slot| {
                if let Some(session) = slot {
                    session.pending = None;
                    session.advance(WorkflowStage::AwaitingSelection);
                }
            })
            .await;

        self.transport.send_text(chat, CANCELLED).await
    }

    fn next_token(&self) -> u64 {
        self.operations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Rename `staged` to `dest` and record it, under the user's session lock,
    /// if `is_current` still holds for the session.
    ///
    /// Returns `Ok(false)` when the session moved on; the staged file is deleted
    /// and `dest` is left alone.
    async fn commit_staged<C, R>(
        &self,
        user: UserId,
        staged: &Path,
        dest: &Path,
        is_current: C,
        record: R,
    ) -> Result<bool>
    where
        C: FnOnce(&Session) -> bool,
        R: FnOnce(&mut Session),
    {
        let mut slot = self.sessions.lock(user).await;
        let current = slot.as_ref().is_some_and(is_current);
        let renamed = match slot.as_mut() {
            Some(session) if current => {
                let renamed = tokio::fs::rename(staged, dest).await;
                if renamed.is_ok() {
                    record(session);
                    session.touch();
                }
                Some(renamed)
            }
            _ => None,
        };
        drop(slot);

        match renamed {
            Some(Ok(())) => Ok(true),
            Some(Err(e)) => {
                let _ = self.storage.remove_if_exists(staged).await;
                Err(e.into())
            }
            None => {
                self.sessions.prune(user).await;
                let _ = self.storage.remove_if_exists(staged).await;
                Ok(false)
            }
        }
    }

    async fn clear_pending(&self, user: UserId, operation: PendingOperation) {
        self.sessions
            .update(user, |slot| {
                if let Some(session) = slot.as_mut().filter(|s| s.pending == Some(operation)) {
                    session.pending = None;
                    session.touch();
                }
            })
            .await;
    }

    async fn discard_artifacts(&self, session: &Session) {
        for path in session.artifact_paths() {
            if let Err(e) = self.storage.remove_if_exists(&path).await {
                warn!("Failed to delete superseded file {}: {}", path.display(), e);
            }
        }
    }
}

fn accepts_timecode(stage: WorkflowStage) -> bool {
    matches!(stage, WorkflowStage::AwaitingTimecode | WorkflowStage::Done)
}

fn megabytes(bytes: u64) -> String {
    format!("{:.1}", bytes as f64 / (1024.0 * 1024.0))
}

/// Movie id from an inline choice payload
pub fn parse_selection(data: &str) -> Option<u64> {
    data.strip_prefix(SELECTION_PREFIX)?.parse().ok()
}

/// Poster caption, shortened to the platform caption limit
pub fn selection_caption(detail: &MovieDetail) -> String {
    let head = format!("🎬 {}\n\n", detail.title);
    let tail = "\n\nSend me a video file 🎥";
    let budget = MAX_CAPTION_CHARS.saturating_sub(head.chars().count() + tail.chars().count());

    let overview = if detail.overview.chars().count() > budget {
        let mut short: String = detail.overview.chars().take(budget.saturating_sub(1)).collect();
        short.push('…');
        short
    } else {
        detail.overview.clone()
    };

    format!("{}{}{}", head, overview, tail)
}
