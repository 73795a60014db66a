//! History policy: bounded transcripts and idle-session expiry.

use super::{Session, SessionStore};
use crate::config::SessionConfig;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistoryPolicy {
    /// Turns kept after each completed exchange. `None` = unbounded.
    pub max_turns: Option<usize>,
    /// Idle sessions older than this are evicted. `None` = never.
    pub idle_ttl: Option<Duration>,
}

impl HistoryPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_turns: config.max_turns(),
            idle_ttl: config.idle_ttl(),
        }
    }

    /// Keep only the newest `max_turns` turns. Returns how many were dropped.
    ///
    /// A kept transcript never opens with an assistant reply, so it may end up a turn
    /// or two shorter than `max_turns` after a failed exchange.
    pub fn trim(&self, session: &mut Session) -> usize {
        let Some(max_turns) = self.max_turns else {
            return 0;
        };
        let mut dropped = session.retain_newest(max_turns);
        if dropped > 0 {
            dropped += session.drop_leading_replies();
            debug!(
                session_id = %session.session_id,
                dropped,
                kept = session.turns().len(),
                "Trimmed session history"
            );
        }
        dropped
    }

    /// Run one eviction pass. No-op without an idle TTL.
    pub fn sweep(&self, store: &SessionStore) -> usize {
        match self.idle_ttl {
            Some(ttl) => store.evict_idle(ttl),
            None => 0,
        }
    }

    /// Spawn the background sweeper. Returns `None` when sessions never expire.
    pub fn spawn_sweeper(self, store: SessionStore, every: Duration) -> Option<JoinHandle<()>> {
        self.idle_ttl?;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = self.sweep(&store);
                if evicted > 0 {
                    info!(evicted, remaining = store.len(), "Evicted idle sessions");
                }
            }
        }))
    }
}
