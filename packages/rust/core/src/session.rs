//! Session store: concurrent per-session access via `DashMap`.
//!
//! Every session sits behind its own async mutex, so operations on one
//! session run strictly one at a time while different sessions never block
//! each other. The map itself is only touched briefly to look up, insert or
//! remove a handle; no map guard is ever held across an `.await`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use carebot_shared::{Answers, SessionId};

/// Default inactivity window before a session is swept: 1 hour.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::hours(1);

/// One in-progress questionnaire conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Index of the next question to ask.
    pub cursor: usize,
    pub answers: Answers,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Set once the session left the store; a late lock holder must not use it.
    retired: bool,
}

impl Session {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            cursor: 0,
            answers: Answers::new(),
            created_at: now,
            last_active_at: now,
            retired: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    pub fn idle_duration(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_active_at
    }
}

/// Exclusive access to one live session.
pub type SessionGuard = OwnedMutexGuard<Session>;

/// Thread-safe owner of all questionnaire sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session and return its handle.
    pub fn create(&self) -> SessionId {
        let session = Session::new(Utc::now());
        let id = session.id;
        self.sessions.insert(id, Arc::new(Mutex::new(session)));
        info!(session_id = %id, active = self.sessions.len(), "session created");
        id
    }

    /// Wait for exclusive access to a session. `None` if it does not exist
    /// (or was removed while waiting).
    pub async fn lock(&self, id: SessionId) -> Option<SessionGuard> {
        let handle = self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))?;
        let guard = handle.lock_owned().await;
        (!guard.retired).then_some(guard)
    }

    /// Remove the session held by `guard`. Irreversible.
    pub fn retire(&self, guard: &mut SessionGuard) {
        guard.retired = true;
        self.sessions.remove(&guard.id);
    }

    /// Copy of a session's state, without refreshing it.
    pub async fn snapshot(&self, id: SessionId) -> Option<Session> {
        self.lock(id).await.map(|guard| guard.clone())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session idle for longer than `ttl` at `now`.
    ///
    /// Sessions busy with an operation are active by definition and skipped.
    /// Returns the number of sessions removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let handles: Vec<(SessionId, Arc<Mutex<Session>>)> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        let mut removed = 0;
        for (id, handle) in handles {
            let Ok(mut session) = handle.try_lock() else {
                debug!(session_id = %id, "session busy, skipping sweep");
                continue;
            };
            if !session.retired && session.idle_duration(now) > ttl {
                session.retired = true;
                self.sessions.remove(&id);
                removed += 1;
                info!(session_id = %id, answered = session.cursor, "session expired");
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_lock() {
        let store = SessionStore::new();
        let id = store.create();
        assert!(store.contains(id));
        let guard = store.lock(id).await.expect("session exists");
        assert_eq!(guard.cursor, 0);
        assert!(guard.answers.is_empty());
    }

    #[tokio::test]
    async fn unknown_session_is_none() {
        let store = SessionStore::new();
        assert!(store.lock(SessionId::new()).await.is_none());
    }

    #[tokio::test]
    async fn retire_removes_and_invalidates_waiters() {
        let store = Arc::new(SessionStore::new());
        let id = store.create();

        let mut guard = store.lock(id).await.unwrap();
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.lock(id).await.is_some() })
        };
        tokio::task::yield_now().await;

        store.retire(&mut guard);
        drop(guard);

        assert!(!waiter.await.unwrap(), "waiter must not see a retired session");
        assert!(!store.contains(id));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn sweep_respects_ttl_boundary() {
        let store = SessionStore::new();
        let id = store.create();
        let last = store.snapshot(id).await.unwrap().last_active_at;
        let ttl = Duration::hours(1);

        // Exactly at the boundary: kept.
        assert_eq!(store.sweep_expired(last + ttl, ttl), 0);
        assert!(store.contains(id));

        // One millisecond past: removed.
        assert_eq!(store.sweep_expired(last + ttl + Duration::milliseconds(1), ttl), 1);
        assert!(!store.contains(id));

        // Idempotent.
        assert_eq!(store.sweep_expired(last + ttl * 2, ttl), 0);
    }

    #[tokio::test]
    async fn sweep_skips_busy_sessions() {
        let store = SessionStore::new();
        let id = store.create();
        let guard = store.lock(id).await.unwrap();
        let far_future = guard.last_active_at + Duration::days(2);

        assert_eq!(store.sweep_expired(far_future, DEFAULT_INACTIVITY_TIMEOUT), 0);
        drop(guard);
        assert_eq!(store.sweep_expired(far_future, DEFAULT_INACTIVITY_TIMEOUT), 1);
    }

    #[tokio::test]
    async fn different_sessions_do_not_block_each_other() {
        let store = SessionStore::new();
        let a = store.create();
        let b = store.create();

        let _held = store.lock(a).await.unwrap();
        let other = tokio::time::timeout(std::time::Duration::from_millis(200), store.lock(b)).await;
        assert!(matches!(other, Ok(Some(_))));
    }
}
