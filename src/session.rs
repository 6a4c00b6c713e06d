//! Per-user conversation memory
//!
//! Keeps a bounded sliding window of turns for every user and starts the
//! conversation over once the user has been idle for too long.
//! Transport-agnostic: the key is any hashable user identifier.

use crate::config::{SESSION_HISTORY_LIMIT, SESSION_IDLE_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

/// Author of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message written by the user
    User,
    /// Reply produced by the model
    Assistant,
}

impl Role {
    /// Wire name of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry of the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who said it
    pub role: Role,
    /// What was said
    pub content: String,
}

impl Turn {
    /// Create a new turn
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

struct Session {
    turns: VecDeque<Turn>,
    last_activity: Instant,
}

impl Session {
    fn new(now: Instant) -> Self {
        Self {
            turns: VecDeque::new(),
            last_activity: now,
        }
    }

    fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > idle_timeout
    }
}

/// Keyed store of conversation histories
///
/// Every operation on one key runs under that session's lock while the map
/// lock is held, so concurrent reads, appends and sweeps never interleave on
/// the same session.
pub struct SessionStore<Id: Hash + Eq + Clone + Send + Sync + fmt::Debug + 'static> {
    sessions: RwLock<HashMap<Id, Arc<Mutex<Session>>>>,
    history_limit: usize,
    idle_timeout: Duration,
}

impl<Id: Hash + Eq + Clone + Send + Sync + fmt::Debug + 'static> Default for SessionStore<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: Hash + Eq + Clone + Send + Sync + fmt::Debug + 'static> SessionStore<Id> {
    /// Create a store with the default limits (10 turns, 5 minutes idle)
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(
            SESSION_HISTORY_LIMIT,
            Duration::from_secs(SESSION_IDLE_TIMEOUT_SECS),
        )
    }

    /// Create a store with custom limits
    ///
    /// A `history_limit` of zero is raised to one.
    #[must_use]
    pub fn with_limits(history_limit: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_limit: history_limit.max(1),
            idle_timeout,
        }
    }

    /// Maximum number of turns kept per user
    #[must_use]
    pub const fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Idle time after which a session is reset
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    async fn with_session<R>(&self, id: &Id, op: impl FnOnce(&mut Session, Instant) -> R) -> R {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(id) {
                let mut session = session.lock().await;
                return op(&mut session, Instant::now());
            }
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(Instant::now()))))
            .clone();
        let mut session = session.lock().await;
        op(&mut session, Instant::now())
    }

    /// Return the user's history, starting over if the session went idle.
    ///
    /// Reading counts as activity: the idle clock restarts on every call.
    ///
    /// # Examples
    ///
    /// ```
    /// use oxide_chat::session::{Role, SessionStore};
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let store = SessionStore::<i64>::new();
    /// store.append(&1, Role::User, "hi").await;
    /// assert_eq!(store.get_or_reset(&1).await.len(), 1);
    /// # }
    /// ```
    pub async fn get_or_reset(&self, id: &Id) -> Vec<Turn> {
        let idle_timeout = self.idle_timeout;
        self.with_session(id, |session, now| {
            if session.is_idle(now, idle_timeout) {
                debug!(user_id = ?id, "Session idle, starting a new conversation");
                session.turns.clear();
            }
            session.last_activity = now;
            session.turns.iter().cloned().collect()
        })
        .await
    }

    /// Append a turn, evicting the oldest ones beyond the history limit.
    pub async fn append(&self, id: &Id, role: Role, content: impl Into<String>) {
        let turn = Turn::new(role, content);
        let limit = self.history_limit;
        self.with_session(id, move |session, now| {
            session.turns.push_back(turn);
            while session.turns.len() > limit {
                session.turns.pop_front();
            }
            session.last_activity = now;
        })
        .await;
    }

    /// Drop the user's history
    pub async fn clear(&self, id: &Id) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(id).is_some() {
            debug!(user_id = ?id, "Session cleared");
        }
    }

    /// Remove sessions idle past the timeout, returning how many were removed.
    ///
    /// Sessions currently locked by an in-flight operation are kept.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.idle_timeout;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| {
            session
                .try_lock()
                .map_or(true, |session| !session.is_idle(now, idle_timeout))
        });
        before - sessions.len()
    }

    /// Number of tracked users
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no user is tracked
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(turns: &[Turn]) -> Vec<&str> {
        turns.iter().map(|t| t.content.as_str()).collect()
    }

    #[tokio::test]
    async fn test_new_user_starts_empty() {
        let store = SessionStore::<i64>::new();
        assert!(store.get_or_reset(&7).await.is_empty());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_window_keeps_last_ten_in_order() {
        let store = SessionStore::<i64>::new();
        for i in 0..15 {
            store.append(&1, Role::User, format!("m{i}")).await;
        }

        let turns = store.get_or_reset(&1).await;
        assert_eq!(turns.len(), 10);
        let expected: Vec<String> = (5..15).map(|i| format!("m{i}")).collect();
        assert_eq!(
            contents(&turns),
            expected.iter().map(String::as_str).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_roles_are_preserved() {
        let store = SessionStore::<String>::new();
        let id = "alice".to_string();
        store.append(&id, Role::User, "question").await;
        store.append(&id, Role::Assistant, "answer").await;

        let turns = store.get_or_reset(&id).await;
        assert_eq!(turns[0], Turn::new(Role::User, "question"));
        assert_eq!(turns[1], Turn::new(Role::Assistant, "answer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_is_reset() {
        let store = SessionStore::<i64>::new();
        store.append(&1, Role::User, "old").await;
        store.append(&1, Role::Assistant, "old reply").await;

        tokio::time::advance(Duration::from_secs(SESSION_IDLE_TIMEOUT_SECS + 1)).await;

        assert!(store.get_or_reset(&1).await.is_empty());
        store.append(&1, Role::User, "fresh").await;
        let turns = store.get_or_reset(&1).await;
        assert_eq!(contents(&turns), vec!["fresh"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_keep_session_alive() {
        let store = SessionStore::<i64>::new();
        store.append(&1, Role::User, "keep me").await;

        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(SESSION_IDLE_TIMEOUT_SECS - 10)).await;
            assert_eq!(store.get_or_reset(&1).await.len(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_timeout_is_not_idle() {
        let store = SessionStore::<i64>::new();
        store.append(&1, Role::User, "edge").await;

        tokio::time::advance(Duration::from_secs(SESSION_IDLE_TIMEOUT_SECS)).await;
        assert_eq!(store.get_or_reset(&1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let store = SessionStore::<i64>::new();
        store.append(&1, Role::User, "one").await;
        store.append(&2, Role::User, "two").await;
        store.clear(&1).await;

        assert!(store.get_or_reset(&1).await.is_empty());
        assert_eq!(contents(&store.get_or_reset(&2).await), vec!["two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_removes_only_stale_sessions() {
        let store = SessionStore::<i64>::new();
        store.append(&1, Role::User, "stale").await;

        tokio::time::advance(Duration::from_secs(SESSION_IDLE_TIMEOUT_SECS + 1)).await;
        store.append(&2, Role::User, "fresh").await;

        assert_eq!(store.evict_idle().await, 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(contents(&store.get_or_reset(&2).await), vec!["fresh"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_lose_nothing() {
        let store = Arc::new(SessionStore::<i64>::with_limits(
            1000,
            Duration::from_secs(SESSION_IDLE_TIMEOUT_SECS),
        ));

        let mut handles = Vec::new();
        for task in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    store.append(&1, Role::User, format!("{task}-{i}")).await;
                    let _ = store.get_or_reset(&1).await;
                }
            }));
        }
        for handle in handles {
            assert!(handle.await.is_ok());
        }

        assert_eq!(store.get_or_reset(&1).await.len(), 400);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_respect_cap() {
        let store = Arc::new(SessionStore::<i64>::new());

        let mut handles = Vec::new();
        for task in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    store.append(&9, Role::Assistant, format!("{task}-{i}")).await;
                }
            }));
        }
        for handle in handles {
            assert!(handle.await.is_ok());
        }

        assert_eq!(store.get_or_reset(&9).await.len(), SESSION_HISTORY_LIMIT);
    }
}
