//! Memory Entry - the unit of retention
//!
//! Each entry wraps either a raw message, a detected landmark, or a
//! Summary that stands in for a migrated batch. Entries are immutable
//! except for the access-tracking pair (`access_count`, `last_accessed`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::affect::Affect;
use crate::message::Message;

// ============================================================================
// ENTRY KINDS
// ============================================================================

/// Kinds of memory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A message admitted verbatim.
    #[default]
    RawMessage,
    /// High-intensity emotional moment.
    EmotionalPeak,
    /// Something got finished, fixed, shipped.
    Accomplishment,
    /// An expressed regret.
    Regret,
    /// A first: first session, first of a day, first of a phrase.
    Milestone,
    /// Stands in for a batch of migrated entries.
    Summary,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::RawMessage => "raw_message",
            EntryKind::EmotionalPeak => "emotional_peak",
            EntryKind::Accomplishment => "accomplishment",
            EntryKind::Regret => "regret",
            EntryKind::Milestone => "milestone",
            EntryKind::Summary => "summary",
        }
    }

    /// Landmark kinds qualify for Lifetime on first detection.
    pub fn is_landmark(&self) -> bool {
        matches!(
            self,
            EntryKind::EmotionalPeak
                | EntryKind::Accomplishment
                | EntryKind::Regret
                | EntryKind::Milestone
        )
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The landmark kinds, in Lifetime bucket order.
pub const LANDMARK_KINDS: [EntryKind; 4] = [
    EntryKind::EmotionalPeak,
    EntryKind::Accomplishment,
    EntryKind::Regret,
    EntryKind::Milestone,
];

// ============================================================================
// MEMORY ENTRY
// ============================================================================

/// A retained memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    /// Stable identifier. Raw messages reuse their `message_id`, so
    /// duplicate deliveries collapse on admission.
    pub entry_id: String,
    pub kind: EntryKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Absent for most Summary entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affect: Option<Affect>,
    /// Set by the importance scorer; [0, ∞).
    pub importance: f64,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    /// Entry ids a Summary stands in for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<String>,
    /// Source session, kept for the projector's context sections.
    #[serde(default)]
    pub session_id: String,
    /// Whether this message triggered any landmark at admission.
    #[serde(default)]
    pub landmark: bool,
    /// Relationship-state shift across this message, captured at admission
    /// for the scorer's relation term.
    #[serde(default)]
    pub relationship_delta: f64,
}

impl MemoryEntry {
    /// Wrap an admitted message as a raw entry.
    pub fn from_message(message: &Message, affect: Affect, relationship_delta: f64) -> Self {
        Self {
            entry_id: message.message_id.clone(),
            kind: EntryKind::RawMessage,
            content: message.content.clone(),
            timestamp: message.timestamp,
            affect: Some(affect),
            importance: 0.0,
            access_count: 0,
            last_accessed: message.timestamp,
            refs: Vec::new(),
            session_id: message.session_id.clone(),
            landmark: false,
            relationship_delta,
        }
    }

    /// Copy an entry into Lifetime under a landmark kind.
    pub fn as_landmark(&self, kind: EntryKind) -> Self {
        let mut copy = self.clone();
        copy.entry_id = format!("{}-{}", kind.as_str(), self.entry_id);
        copy.kind = kind;
        copy.landmark = true;
        copy
    }

    /// Retention weight at `now` for a scale with the given half-life.
    ///
    /// `w = importance · exp(−age/half_life) · (1 + ln(1 + access_count))`.
    /// A `None` half-life (Lifetime) skips the decay factor entirely.
    pub fn retention_weight(&self, now: DateTime<Utc>, half_life_seconds: Option<u64>) -> f64 {
        let base = self.importance.max(0.0);
        let access_boost = 1.0 + (1.0 + self.access_count as f64).ln();
        match half_life_seconds {
            Some(half_life) if half_life > 0 => {
                let age = (now - self.timestamp).num_seconds().max(0) as f64;
                base * (-age / half_life as f64).exp() * access_boost
            }
            _ => base * access_boost,
        }
    }

    /// Record a retrieval. The only mutation an entry ever sees.
    pub fn record_access(&mut self, at: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed = at;
    }

    /// Age of the entry at `now`, in seconds.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }
}

// ============================================================================
// TESTS
// ============================================================================
