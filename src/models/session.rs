//! Per-session protocol state tracked by the protocol enforcer.

use super::MemoryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded context-check: the host telling the engine "I am about to
/// work on `topic`".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCheck {
    /// Free-text description of the work about to happen.
    pub topic: String,
    /// When the check was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Per-session protocol record, keyed by a session id scoped to a project
/// and an hour bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// `8-hex-of-md5(project_path)` + `-` + `YYYYMMDDHH` (UTC).
    pub session_id: String,
    /// The project this session belongs to.
    pub project_path: String,
    /// Whether `get_briefing` has been called this session.
    pub briefed: bool,
    /// Ordered, truncated to the last 20.
    pub context_checks: Vec<ContextCheck>,
    /// Memory ids awaiting an outcome.
    pub pending_decisions: Vec<MemoryId>,
    /// Last time any protocol call touched this session.
    pub last_activity: DateTime<Utc>,
    /// When this session record was first created.
    pub created_at: DateTime<Utc>,
}

impl SessionState {
    /// Maximum number of context-check entries retained.
    pub const MAX_CONTEXT_CHECKS: usize = 20;

    /// Creates a fresh, unbriefed session record.
    #[must_use]
    pub fn new(session_id: String, project_path: String, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            project_path,
            briefed: false,
            context_checks: Vec::new(),
            pending_decisions: Vec::new(),
            last_activity: now,
            created_at: now,
        }
    }

    /// Appends a context check, trimming to the most recent
    /// [`Self::MAX_CONTEXT_CHECKS`] entries.
    pub fn record_context_check(&mut self, topic: String, now: DateTime<Utc>) {
        self.context_checks.push(ContextCheck {
            topic,
            timestamp: now,
        });
        if self.context_checks.len() > Self::MAX_CONTEXT_CHECKS {
            let overflow = self.context_checks.len() - Self::MAX_CONTEXT_CHECKS;
            self.context_checks.drain(0..overflow);
        }
        self.last_activity = now;
    }

    /// Whether any context check is within `ttl_seconds` of `now`.
    #[must_use]
    pub fn has_recent_context_check(&self, ttl_seconds: i64, now: DateTime<Utc>) -> bool {
        self.context_checks
            .iter()
            .any(|c| (now - c.timestamp).num_seconds() <= ttl_seconds)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn context_checks_are_trimmed_to_twenty() {
        let now = Utc::now();
        let mut state = SessionState::new("abc-2026010100".to_string(), "/p".to_string(), now);
        for i in 0..25 {
            state.record_context_check(format!("topic-{i}"), now);
        }
        assert_eq!(state.context_checks.len(), SessionState::MAX_CONTEXT_CHECKS);
        assert_eq!(state.context_checks.first().unwrap().topic, "topic-5");
    }

    #[test]
    fn recent_check_detection_respects_ttl() {
        let now = Utc::now();
        let mut state = SessionState::new("abc-2026010100".to_string(), "/p".to_string(), now);
        state.record_context_check("t".to_string(), now - Duration::seconds(400));
        assert!(!state.has_recent_context_check(300, now));
        state.record_context_check("t2".to_string(), now - Duration::seconds(10));
        assert!(state.has_recent_context_check(300, now));
    }
}
