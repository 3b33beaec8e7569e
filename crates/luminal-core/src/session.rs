//! Session tracking
//!
//! Groups incoming messages by their source log and synthesizes a
//! Separator message whenever the active session changes. A switch to a
//! never-seen file is a new session; a switch back to a known file is a
//! resume. During backfill separators are suppressed; files are only
//! marked as seen.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::message::Message;

// ============================================================================
// SESSION TRACKER
// ============================================================================

/// The session state machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTracker {
    /// Currently active session id (`None` before the first message).
    active: Option<String>,
    /// Every session id ever observed.
    seen: HashSet<String>,
    /// Suppress separators and only mark files seen (backfill mode).
    #[serde(default)]
    suppress_separators: bool,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_session(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn sessions_seen(&self) -> usize {
        self.seen.len()
    }

    /// Enter or leave backfill mode.
    pub fn set_suppress_separators(&mut self, suppress: bool) {
        self.suppress_separators = suppress;
    }

    /// Observe a message from `session_id`. Returns the Separator to
    /// inject *before* the message, when the session changed.
    pub fn observe(&mut self, session_id: &str, at: DateTime<Utc>) -> Option<Message> {
        let previously_seen = !self.seen.insert(session_id.to_string());

        match self.active.as_deref() {
            None => {
                self.active = Some(session_id.to_string());
                None
            }
            Some(current) if current == session_id => None,
            Some(current) => {
                let from = current.to_string();
                self.active = Some(session_id.to_string());
                if self.suppress_separators {
                    return None;
                }
                info!(
                    from = %from,
                    to = %session_id,
                    resumed = previously_seen,
                    "session switch"
                );
                Some(Message::separator(&from, session_id, previously_seen, at))
            }
        }
    }

}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Speaker;

    #[test]
    fn test_first_message_sets_session_without_separator() {
        let mut tracker = SessionTracker::new();
        assert!(tracker.observe("a.log", Utc::now()).is_none());
        assert_eq!(tracker.active_session(), Some("a.log"));
    }

    #[test]
    fn test_same_session_is_silent() {
        let mut tracker = SessionTracker::new();
        tracker.observe("a.log", Utc::now());
        assert!(tracker.observe("a.log", Utc::now()).is_none());
    }

    #[test]
    fn test_switch_to_fresh_session_emits_separator() {
        let mut tracker = SessionTracker::new();
        tracker.observe("a.log", Utc::now());
        let sep = tracker.observe("b.log", Utc::now()).expect("separator");
        assert_eq!(sep.speaker, Speaker::Separator);
        assert!(sep.content.contains("a.log -> b.log"));
        assert!(sep.content.contains("(new)"));
        assert_eq!(tracker.active_session(), Some("b.log"));
    }

    #[test]
    fn test_switch_back_is_a_resume() {
        let mut tracker = SessionTracker::new();
        tracker.observe("a.log", Utc::now());
        tracker.observe("b.log", Utc::now());
        let sep = tracker.observe("a.log", Utc::now()).expect("separator");
        assert!(sep.content.contains("(resumed)"));
    }

    #[test]
    fn test_backfill_suppresses_but_marks_seen() {
        let mut tracker = SessionTracker::new();
        tracker.set_suppress_separators(true);
        tracker.observe("a.log", Utc::now());
        assert!(tracker.observe("b.log", Utc::now()).is_none());
        tracker.set_suppress_separators(false);

        // After backfill, switching back to a is a resume.
        let sep = tracker.observe("a.log", Utc::now()).expect("separator");
        assert!(sep.content.contains("(resumed)"));
        assert_eq!(tracker.sessions_seen(), 2);
    }
}
