//! # Session Store
//!
//! Process-wide map from session id to transcript, injected into the application
//! state rather than living in a global.
//!
//! ## Locking discipline:
//! Every slot carries two locks. The *turn lock* (`tokio::sync::Mutex<()>`) is held by
//! the turn orchestrator for the whole stateful part of a turn, so two requests for the
//! same session run one after the other instead of interleaving their appends. The
//! transcript itself sits behind a `std::sync::Mutex` that is only taken for a copy or
//! an append and never across an `.await`, so reading history does not queue behind a
//! turn that is waiting on an upstream call.
//!
//! Requests for different sessions never wait on each other; the outer `DashMap` is only
//! touched briefly to look a slot up.

use super::{Role, Session, Turn};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// One session and the lock that serializes its turns.
#[derive(Debug)]
pub struct SessionSlot {
    turn_lock: Arc<tokio::sync::Mutex<()>>,
    session: Mutex<Session>,
}

impl SessionSlot {
    fn new(session_id: &str) -> Self {
        Self {
            turn_lock: Arc::new(tokio::sync::Mutex::new(())),
            session: Mutex::new(Session::new(session_id)),
        }
    }

    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_busy(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }
}

/// Shared handle to one session slot.
pub type SessionHandle = Arc<SessionSlot>;

/// Exclusive right to run a turn on one session. Released on drop.
#[derive(Debug)]
pub struct TurnPermit {
    _guard: OwnedMutexGuard<()>,
}

/// Outcome of [`SessionStore::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    Missing,
    /// A turn kept the session for longer than the caller was willing to wait.
    Busy,
}

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session, creating an empty one for an unseen id. Never fails.
    pub fn get_or_create(&self, session_id: &str) -> SessionHandle {
        if let Some(existing) = self.sessions.get(session_id) {
            return existing.value().clone();
        }
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id = %session_id, "Creating session");
                Arc::new(SessionSlot::new(session_id))
            })
            .value()
            .clone()
    }

    fn lookup(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    fn is_current(&self, session_id: &str, handle: &SessionHandle) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), handle))
    }

    /// Wait (up to `wait`) for exclusive use of a session.
    ///
    /// Returns `None` when another turn still holds it after `wait`.
    pub async fn acquire(&self, session_id: &str, wait: Duration) -> Option<TurnPermit> {
        tokio::time::timeout(wait, self.lock_turn(session_id)).await.ok()
    }

    async fn lock_turn(&self, session_id: &str) -> TurnPermit {
        loop {
            let handle = self.get_or_create(session_id);
            let guard = handle.turn_lock.clone().lock_owned().await;
            // The slot may have been evicted or reset while we waited for it.
            if self.is_current(session_id, &handle) {
                return TurnPermit { _guard: guard };
            }
            debug!(session_id = %session_id, "Session replaced while waiting for it, retrying");
        }
    }

    /// Append one turn. Always appends; each call gets the next position.
    pub fn append_turn(&self, session_id: &str, role: Role, text: impl Into<String>) -> Turn {
        let handle = self.get_or_create(session_id);
        let mut session = handle.session();
        session.append(role, text).clone()
    }

    /// Snapshot of the transcript in append order. Unknown ids read as empty
    /// without being created. Never waits for a turn in flight.
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.with_session(session_id, |session| session.turns().to_vec())
            .unwrap_or_default()
    }

    /// Run `f` on an existing session. Unknown ids yield `None` and are not created.
    pub fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let handle = self.lookup(session_id)?;
        let mut session = handle.session();
        Some(f(&mut *session))
    }

    /// Forget a session entirely, waiting (up to `wait`) for a turn in flight to finish.
    pub async fn remove(&self, session_id: &str, wait: Duration) -> Removal {
        let Some(handle) = self.lookup(session_id) else {
            return Removal::Missing;
        };
        let Ok(_guard) = tokio::time::timeout(wait, handle.turn_lock.clone().lock_owned()).await else {
            return Removal::Busy;
        };

        match self.sessions.remove_if(session_id, |_, current| Arc::ptr_eq(current, &handle)) {
            Some(_) => Removal::Removed,
            None => Removal::Missing,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Drop sessions that have been idle for longer than `ttl`.
    ///
    /// A session whose turn lock is held is in use by definition and is kept.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        {
            Some(cutoff) => cutoff,
            None => return 0,
        };
        let before = self.sessions.len();

        self.sessions
            .retain(|_, slot| slot.is_busy() || slot.session().last_active() >= cutoff);

        before.saturating_sub(self.sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn new_session_is_empty() {
        let store = SessionStore::new();
        let handle = store.get_or_create("fresh");
        assert!(handle.session().turns().is_empty());
        assert!(store.history("fresh").is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn history_of_unknown_id_does_not_create_it() {
        let store = SessionStore::new();
        assert!(store.history("ghost").is_empty());
        assert_eq!(store.with_session("ghost", |s| s.created_at), None);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn appended_turns_read_back_in_order() {
        let store = SessionStore::new();
        let messages: Vec<String> = (0..25).map(|i| format!("message {}", i)).collect();
        for (i, text) in messages.iter().enumerate() {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            store.append_turn("abc", role, text.clone());
        }

        let history = store.history("abc");
        let contents: Vec<String> = history.iter().map(|t| t.content.clone()).collect();
        assert_eq!(contents, messages);
        let positions: Vec<u64> = history.iter().map(|t| t.position).collect();
        assert_eq!(positions, (0..25).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn duplicate_appends_are_kept() {
        let store = SessionStore::new();
        store.append_turn("dup", Role::User, "same");
        store.append_turn("dup", Role::User, "same");
        assert_eq!(store.history("dup").len(), 2);
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_session() {
        let store = SessionStore::new();
        let a = store.get_or_create("x");
        let b = store.get_or_create("x");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn acquire_times_out_while_another_turn_holds_the_session() {
        let store = SessionStore::new();
        let held = store.acquire("busy", Duration::from_secs(1)).await;
        assert!(held.is_some());

        assert!(store.acquire("busy", Duration::from_millis(10)).await.is_none());
        // Other sessions are unaffected.
        assert!(store.acquire("other", Duration::ZERO).await.is_some());

        drop(held);
        assert!(store.acquire("busy", Duration::ZERO).await.is_some());
    }

    #[tokio::test]
    async fn history_reads_while_a_turn_is_in_flight() {
        let store = SessionStore::new();
        let _permit = store.acquire("abc", Duration::ZERO).await.expect("unlocked");
        store.append_turn("abc", Role::User, "hello");

        let history = store.history("abc");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hello");
    }

    #[tokio::test]
    async fn turn_waiting_on_a_replaced_session_moves_to_the_live_one() {
        let store = SessionStore::new();
        let stale = store.get_or_create("abc");
        let in_flight = stale.turn_lock.clone().lock_owned().await;

        let waiting = {
            let store = store.clone();
            tokio::spawn(async move { store.acquire("abc", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Evicted while the second turn was queued on its lock.
        store.sessions.remove("abc");
        drop(in_flight);

        let permit = waiting.await.unwrap().expect("turn should get the session");
        let live = store.get_or_create("abc");
        assert!(!Arc::ptr_eq(&stale, &live));
        // The permit guards the slot that appends land in.
        assert!(store.acquire("abc", Duration::ZERO).await.is_none());

        store.append_turn("abc", Role::User, "hello");
        drop(permit);
        assert_eq!(store.history("abc").len(), 1);
        assert!(store.acquire("abc", Duration::ZERO).await.is_some());
    }

    #[tokio::test]
    async fn evicts_only_idle_unlocked_sessions() {
        let store = SessionStore::new();
        store.append_turn("stale", Role::User, "old");
        store.append_turn("fresh", Role::User, "new");
        store.append_turn("busy", Role::User, "old but in use");

        let an_hour_ago = Utc::now() - chrono::Duration::hours(1);
        store.with_session("stale", |s| s.set_last_active(an_hour_ago));
        store.with_session("busy", |s| s.set_last_active(an_hour_ago));

        let _permit = store.acquire("busy", Duration::ZERO).await.expect("unlocked");
        let evicted = store.evict_idle(Duration::from_secs(60));

        assert_eq!(evicted, 1);
        assert!(store.history("stale").is_empty());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn remove_forgets_history() {
        let store = SessionStore::new();
        store.append_turn("gone", Role::User, "hi");
        assert_eq!(store.remove("gone", Duration::ZERO).await, Removal::Removed);
        assert_eq!(store.remove("gone", Duration::ZERO).await, Removal::Missing);
        assert!(store.get_or_create("gone").session().turns().is_empty());
    }

    #[tokio::test]
    async fn remove_waits_for_the_turn_in_flight() {
        let store = SessionStore::new();
        store.append_turn("abc", Role::User, "hi");
        let permit = store.acquire("abc", Duration::ZERO).await.expect("unlocked");

        assert_eq!(store.remove("abc", Duration::from_millis(10)).await, Removal::Busy);
        assert_eq!(store.history("abc").len(), 1);

        drop(permit);
        assert_eq!(store.remove("abc", Duration::from_millis(10)).await, Removal::Removed);
        assert_eq!(store.len(), 0);
    }
}
