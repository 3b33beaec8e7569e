//! Normalized message record
//!
//! Everything downstream of the watcher consumes only this record. Raw
//! log lines are parsed exactly once at the ingest boundary; the original
//! payload is preserved verbatim in `raw` for fidelity.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};

// ============================================================================
// SPEAKER
// ============================================================================

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    #[default]
    User,
    Assistant,
    System,
    /// Synthetic session-boundary marker, never analyzed for affect.
    Separator,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Assistant => "assistant",
            Speaker::System => "system",
            Speaker::Separator => "separator",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "assistant" => Speaker::Assistant,
            "system" => Speaker::System,
            "separator" => Speaker::Separator,
            _ => Speaker::User,
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MESSAGE
// ============================================================================

/// An immutable, normalized conversational message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Stable identifier used for exactly-once dedup across restarts.
    pub message_id: String,
    /// Logical session (source log file name).
    pub session_id: String,
    /// Monotonic per-session ordinal.
    pub seq: u64,
    /// Payload timestamp, or ingest time plus a fractional tiebreaker
    /// preserving arrival order when the payload has none.
    pub timestamp: DateTime<Utc>,
    pub speaker: Speaker,
    pub content: String,
    /// Original payload, verbatim.
    pub raw: String,
}

impl Message {
    /// Parse one line-delimited JSON record into a normalized message.
    ///
    /// `ingest_at` and `seq` supply the fallback timestamp and its
    /// tiebreaker; `byte_range` feeds the parse-error diagnostics.
    pub fn parse_line(
        session_id: &str,
        seq: u64,
        line: &str,
        ingest_at: DateTime<Utc>,
        file: &std::path::Path,
        byte_range: (u64, u64),
    ) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| EngineError::InputParse {
                file: file.to_path_buf(),
                start: byte_range.0,
                end: byte_range.1,
                reason: e.to_string(),
            })?;

        let content = value
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| EngineError::InputParse {
                file: file.to_path_buf(),
                start: byte_range.0,
                end: byte_range.1,
                reason: "record has no textual `content` field".to_string(),
            })?
            .to_string();

        let speaker = value
            .get("role")
            .and_then(|r| r.as_str())
            .map(Speaker::parse_name)
            .unwrap_or(Speaker::User);

        let timestamp = value
            .get("timestamp")
            .and_then(|t| t.as_str())
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            // Microsecond tiebreaker keeps arrival order for records that
            // all fall back to the same ingest instant. `seq` is a byte
            // offset, so it wraps to stay a sub-second fraction.
            .unwrap_or_else(|| ingest_at + Duration::microseconds((seq % 1_000_000) as i64));

        let message_id = value
            .get("uuid")
            .and_then(|u| u.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| stable_id(session_id, line.as_bytes()));

        Ok(Self {
            message_id,
            session_id: session_id.to_string(),
            seq,
            timestamp,
            speaker,
            content,
            raw: line.to_string(),
        })
    }

    /// Build the synthetic separator emitted on a session switch.
    pub fn separator(
        from_session: &str,
        to_session: &str,
        resumed: bool,
        at: DateTime<Utc>,
    ) -> Self {
        let kind = if resumed { "resumed" } else { "new" };
        let content = format!(
            "{}\nsession boundary ({kind}): {from_session} -> {to_session}",
            "=".repeat(80)
        );
        Self {
            message_id: format!("separator-{}", uuid::Uuid::new_v4()),
            session_id: to_session.to_string(),
            seq: 0,
            timestamp: at,
            speaker: Speaker::Separator,
            content,
            raw: String::new(),
        }
    }

    /// Separators are markers, not conversational content.
    pub fn is_separator(&self) -> bool {
        self.speaker == Speaker::Separator
    }
}

/// Stable hash of `(session_id, raw_bytes)`, hex, 32 chars.
pub fn stable_id(session_id: &str, raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update([0]);
    hasher.update(raw);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
