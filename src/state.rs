use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::UserId;

/// Steps of the per-user clip workflow
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkflowStage {
    /// Waiting for the user to pick a movie
    AwaitingSelection,

    /// Movie chosen, waiting for a video upload
    AwaitingVideo,

    /// Video stored, waiting for the start timecode
    AwaitingTimecode,

    /// Excerpt delivered
    Done,
}

impl WorkflowStage {
    /// Get human-readable status string
    pub fn status_string(&self) -> &'static str {
        match self {
            WorkflowStage::AwaitingSelection => "Awaiting Selection",
            WorkflowStage::AwaitingVideo => "Awaiting Video",
            WorkflowStage::AwaitingTimecode => "Awaiting Timecode",
            WorkflowStage::Done => "Done",
        }
    }
}

/// Long-running operation committed for a session and running outside its lock
///
/// The token is unique per operation, so a finished operation can tell
/// whether it is still the one its session is waiting for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PendingOperation {
    Upload(u64),
    Trim(u64),
}

impl PendingOperation {
    pub fn token(&self) -> u64 {
        match self {
            PendingOperation::Upload(token) | PendingOperation::Trim(token) => *token,
        }
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> u64 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Per-user workflow record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Process-unique id; a new selection always gets a new one
    pub id: u64,

    /// Current workflow stage
    pub stage: WorkflowStage,

    /// Title of the chosen movie
    pub selected_title: Option<String>,

    /// Metadata id of the chosen movie
    pub movie_id: Option<u64>,

    /// Uploaded video
    pub source_media_path: Option<PathBuf>,

    /// Trimmed excerpt
    pub trimmed_media_path: Option<PathBuf>,

    /// Downloaded trailer
    pub trailer_media_path: Option<PathBuf>,

    /// Operation in flight, if any
    pub pending: Option<PendingOperation>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Session for a freshly selected movie
    pub fn for_selection(movie_id: u64, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: next_session_id(),
            stage: WorkflowStage::AwaitingVideo,
            selected_title: Some(title.into()),
            movie_id: Some(movie_id),
            source_media_path: None,
            trimmed_media_path: None,
            trailer_media_path: None,
            pending: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new stage and bump the update timestamp
    pub fn advance(&mut self, stage: WorkflowStage) {
        self.stage = stage;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// All files this session references
    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        [
            &self.source_media_path,
            &self.trimmed_media_path,
            &self.trailer_media_path,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }
}

impl Default for Session {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: next_session_id(),
            stage: WorkflowStage::AwaitingSelection,
            selected_title: None,
            movie_id: None,
            source_media_path: None,
            trimmed_media_path: None,
            trailer_media_path: None,
            pending: None,
            created_at: now,
            updated_at: now,
        }
    }
}

type SessionSlot = Arc<Mutex<Option<Session>>>;

/// In-memory session store with per-user locking
///
/// The outer map lock only guards inserting and removing slots. Every
/// read-modify-write of a session happens under that user's slot lock, so
/// events from different users never wait on each other.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    slots: Arc<RwLock<HashMap<UserId, SessionSlot>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, user: UserId) -> SessionSlot {
        if let Some(slot) = self.slots.read().await.get(&user) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(user).or_default())
    }

    /// Snapshot of the user's session
    pub async fn get(&self, user: UserId) -> Option<Session> {
        let slot = self.slots.read().await.get(&user).cloned()?;
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Store a session, replacing any previous one. Returns the replaced session.
    pub async fn put(&self, user: UserId, session: Session) -> Option<Session> {
        self.update(user, |current| current.replace(session)).await
    }

    /// Remove the user's session. Returns the removed session.
    pub async fn remove(&self, user: UserId) -> Option<Session> {
        self.update(user, Option::take).await
    }

    /// Atomic read-modify-write of one user's session
    pub async fn update<F, T>(&self, user: UserId, f: F) -> T
    where
        F: FnOnce(&mut Option<Session>) -> T,
    {
        let slot = self.slot(user).await;
        let (result, empty) = {
            let mut guard = slot.lock().await;
            let result = f(&mut *guard);
            (result, guard.is_none())
        };
        drop(slot);

        if empty {
            self.prune(user).await;
        }
        result
    }

    /// Hold one user's session lock across a short async step (a rename)
    ///
    /// Callers that may leave the slot empty should `prune` after dropping the guard.
    pub async fn lock(&self, user: UserId) -> OwnedMutexGuard<Option<Session>> {
        self.slot(user).await.lock_owned().await
    }

    /// Drop an empty slot from the map when nobody else holds it
    pub(crate) async fn prune(&self, user: UserId) {
        let mut slots = self.slots.write().await;
        let removable = match slots.get(&user) {
            // Only the map holds the slot and nobody can clone it while we
            // hold the write lock.
            Some(slot) if Arc::strong_count(slot) == 1 => {
                matches!(slot.try_lock(), Ok(guard) if guard.is_none())
            }
            _ => false,
        };

        if removable {
            slots.remove(&user);
            debug!("🧹 Dropped empty session slot for user {}", user);
        }
    }

    /// Number of users with a live session
    pub async fn len(&self) -> usize {
        self.stats().await.total_sessions
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Get session statistics
    pub async fn stats(&self) -> SessionStoreStats {
        let slots: Vec<SessionSlot> = self.slots.read().await.values().cloned().collect();
        let mut stats = SessionStoreStats::default();

        for slot in slots {
            if let Some(session) = slot.lock().await.as_ref() {
                stats.total_sessions += 1;
                *stats.by_stage.entry(session.stage).or_insert(0) += 1;
                if session.pending.is_some() {
                    stats.operations_in_flight += 1;
                }
            }
        }

        stats
    }
}

/// Session store statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStoreStats {
    pub total_sessions: usize,
    pub operations_in_flight: usize,
    pub by_stage: HashMap<WorkflowStage, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = SessionStore::new();
        let user = UserId(7);

        assert!(store.get(user).await.is_none());

        let previous = store.put(user, Session::for_selection(27205, "Inception")).await;
        assert!(previous.is_none());

        let session = store.get(user).await.unwrap();
        assert_eq!(session.stage, WorkflowStage::AwaitingVideo);
        assert_eq!(session.selected_title.as_deref(), Some("Inception"));

        let removed = store.remove(user).await.unwrap();
        assert_eq!(removed.movie_id, Some(27205));
        assert!(store.get(user).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_new_selection_replaces_previous() {
        let store = SessionStore::new();
        let user = UserId(1);

        store.put(user, Session::for_selection(1, "First")).await;
        let replaced = store.put(user, Session::for_selection(2, "Second")).await;

        assert_eq!(replaced.unwrap().movie_id, Some(1));
        assert_eq!(store.get(user).await.unwrap().movie_id, Some(2));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_missing_is_noop() {
        let store = SessionStore::new();
        assert!(store.remove(UserId(99)).await.is_none());
        assert!(store.remove(UserId(99)).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let store = SessionStore::new();
        let user = UserId(5);
        store.put(user, Session::default()).await;

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(user, |session| {
                        if let Some(session) = session.as_mut() {
                            let next = session.movie_id.unwrap_or(0) + 1;
                            session.movie_id = Some(next);
                        }
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get(user).await.unwrap().movie_id, Some(50));
    }

    #[tokio::test]
    async fn test_stats_by_stage() {
        let store = SessionStore::new();
        store.put(UserId(1), Session::for_selection(1, "A")).await;
        store.put(UserId(2), Session::for_selection(2, "B")).await;
        store
            .update(UserId(2), |session| {
                if let Some(session) = session.as_mut() {
                    session.advance(WorkflowStage::AwaitingTimecode);
                    session.pending = Some(PendingOperation::Trim(1));
                }
            })
            .await;

        let stats = store.stats().await;
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.operations_in_flight, 1);
        assert_eq!(stats.by_stage.get(&WorkflowStage::AwaitingVideo), Some(&1));
        assert_eq!(stats.by_stage.get(&WorkflowStage::AwaitingTimecode), Some(&1));
    }

    #[tokio::test]
    async fn test_missing_sessions_leave_no_slots() {
        let store = SessionStore::new();
        let user = UserId(3);

        let seen = store.update(user, |session| session.is_some()).await;
        assert!(!seen);
        assert!(store.slots.read().await.is_empty());

        store.put(user, Session::for_selection(1, "A")).await;
        store.remove(user).await;
        assert!(store.slots.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_lock_holds_the_slot() {
        let store = SessionStore::new();
        let user = UserId(4);
        store.put(user, Session::for_selection(1, "A")).await;

        let mut guard = store.lock(user).await;
        guard.as_mut().unwrap().advance(WorkflowStage::Done);
        drop(guard);

        assert_eq!(store.get(user).await.unwrap().stage, WorkflowStage::Done);
    }

    #[test]
    fn test_selections_get_distinct_ids() {
        let first = Session::for_selection(1, "A");
        let second = Session::for_selection(1, "A");
        assert_ne!(first.id, second.id);
        assert_eq!(PendingOperation::Trim(9).token(), 9);
    }

    #[test]
    fn test_artifact_paths() {
        let mut session = Session::for_selection(1, "A");
        assert!(session.artifact_paths().is_empty());

        session.source_media_path = Some(PathBuf::from("/tmp/videos/1.mp4"));
        session.trimmed_media_path = Some(PathBuf::from("/tmp/cuts/1_cut.mp4"));
        assert_eq!(session.artifact_paths().len(), 2);
    }
}
