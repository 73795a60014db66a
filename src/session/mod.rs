//! # Conversation Sessions
//!
//! A session is one client-identified conversation: an ordered list of role-tagged
//! turns that the language model sees as context on every new message.
//!
//! ## Key Components:
//! - **Session / Turn**: the transcript itself (append-only, except for trimming)
//! - **TranscriptView**: read-only, ordered view handed to the response generator
//! - **SessionStore**: process-wide map of sessions with one turn lock per session
//! - **HistoryPolicy**: how long transcripts get and how long idle sessions live
//!
//! ## Lifecycle:
//! 1. **Created** lazily the first time a session id is seen
//! 2. **Grows** by one `user` and one `assistant` turn per completed exchange
//! 3. **Trimmed** from the front by the history policy after each exchange
//! 4. **Evicted** by the idle sweeper, or removed explicitly by a reset request

pub mod policy;
pub mod store;

pub use policy::HistoryPolicy;
pub use store::{Removal, SessionStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged message. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Sequence position within the session. Keeps counting across trims.
    pub position: u64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A single conversation's transcript.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    turns: Vec<Turn>,
    next_position: u64,
    pub created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            turns: Vec::new(),
            next_position: 0,
            created_at: now,
            last_active: now,
        }
    }

    /// Append a turn at the next position. Always appends, never merges.
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> &Turn {
        let now = Utc::now();
        let turn = Turn {
            position: self.next_position,
            role,
            content: content.into(),
            created_at: now,
        };
        self.next_position += 1;
        self.last_active = now;
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    /// Mark the session as used without appending (e.g. a turn that failed early).
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    /// Drop the oldest turns so at most `keep` remain. Returns how many were dropped.
    pub(crate) fn retain_newest(&mut self, keep: usize) -> usize {
        let excess = self.turns.len().saturating_sub(keep);
        if excess > 0 {
            self.turns.drain(..excess);
        }
        excess
    }

    /// Drop leading `assistant` turns so the transcript opens with the user.
    pub(crate) fn drop_leading_replies(&mut self) -> usize {
        let leading = self.turns.iter().take_while(|t| t.role == Role::Assistant).count();
        self.turns.drain(..leading);
        leading
    }

    #[cfg(test)]
    pub(crate) fn set_last_active(&mut self, at: DateTime<Utc>) {
        self.last_active = at;
    }
}

/// Ordered, borrowed transcript handed to the response generator.
#[derive(Debug, Clone, Copy)]
pub struct TranscriptView<'a> {
    turns: &'a [Turn],
}

impl<'a> TranscriptView<'a> {
    pub fn new(turns: &'a [Turn]) -> Self {
        Self { turns }
    }

    pub fn iter(&self) -> std::slice::Iter<'a, Turn> {
        self.turns.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
