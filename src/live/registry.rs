//! Bookkeeping for live sessions across all sockets.
//!
//! A session is registered when it starts connecting and removed when it is
//! torn down. The registry enforces the concurrent-session limit and feeds
//! the health and metrics endpoints.

use crate::live::session::LiveError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, Serialize)]
pub struct LiveSessionInfo {
    pub session_id: String,
    pub state: &'static str,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub active_sessions: usize,
    pub status_counts: HashMap<&'static str, usize>,
    pub oldest_session_started: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct LiveRegistry {
    sessions: RwLock<HashMap<String, LiveSessionInfo>>,
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a slot for `session_id`. Re-registering an id already present
    /// only refreshes it and never counts against the limit.
    pub fn register(&self, session_id: &str, state: &'static str, limit: usize) -> Result<(), LiveError> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = sessions.get_mut(session_id) {
            existing.state = state;
            return Ok(());
        }
        if sessions.len() >= limit {
            return Err(LiveError::Limit(limit));
        }

        sessions.insert(
            session_id.to_string(),
            LiveSessionInfo {
                session_id: session_id.to_string(),
                state,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn set_state(&self, session_id: &str, state: &'static str) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = sessions.get_mut(session_id) {
            info.state = state;
        }
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some()
    }

    #[cfg(test)]
    pub fn count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn summary(&self) -> RegistrySummary {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);

        let mut status_counts = HashMap::new();
        for info in sessions.values() {
            *status_counts.entry(info.state).or_insert(0) += 1;
        }

        RegistrySummary {
            active_sessions: sessions.len(),
            status_counts,
            oldest_session_started: sessions.values().map(|info| info.created_at).min(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_enforced() {
        let registry = LiveRegistry::new();
        registry.register("a", "connecting", 2).unwrap();
        registry.register("b", "connecting", 2).unwrap();

        assert_eq!(registry.register("c", "connecting", 2), Err(LiveError::Limit(2)));
        // Same id again is not a new session
        assert!(registry.register("a", "active", 2).is_ok());
        assert_eq!(registry.count(), 2);

        assert!(registry.remove("b"));
        assert!(!registry.remove("b"));
        assert!(registry.register("c", "connecting", 2).is_ok());
    }

    #[test]
    fn test_summary_counts_states() {
        let registry = LiveRegistry::new();
        registry.register("a", "connecting", 10).unwrap();
        registry.register("b", "connecting", 10).unwrap();
        registry.set_state("b", "active");
        registry.set_state("missing", "active");

        let summary = registry.summary();
        assert_eq!(summary.active_sessions, 2);
        assert_eq!(summary.status_counts.get("active"), Some(&1));
        assert_eq!(summary.status_counts.get("connecting"), Some(&1));
        assert!(summary.oldest_session_started.is_some());
    }
}
