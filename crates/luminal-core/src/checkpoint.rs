//! # Checkpoint Manager
//!
//! Multi-trigger, atomic, fan-out persistence of the full engine state.
//!
//! Any of the triggers is sufficient: N messages, T seconds, an
//! emotional peak, an accomplishment, an error, shutdown, an explicit
//! manual request, or a date rollover. Snapshots are written to every
//! configured target with per-target atomic replace; one surviving
//! target is enough. Rotation keeps the most recent M snapshots live and
//! compresses retired ones into a zstd archive. The newest checkpoint
//! and the one behind the `latest` pointer are never deleted.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::config::CheckpointConfig;
use crate::equation::RelationshipState;
use crate::error::{EngineError, Result};
use crate::hierarchy::TemporalHierarchy;
use crate::session::SessionTracker;
use crate::statedir::{atomic_write, atomic_write_target};

/// Current checkpoint schema version. Loaders refuse anything newer;
/// older-but-additive data deserializes through serde defaults.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

// ============================================================================
// TRIGGERS
// ============================================================================

/// Why a checkpoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointTrigger {
    MessageCount,
    Time,
    EmotionalPeak,
    Accomplishment,
    Error,
    Shutdown,
    Manual,
    Daily,
}

impl CheckpointTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointTrigger::MessageCount => "message_count",
            CheckpointTrigger::Time => "time",
            CheckpointTrigger::EmotionalPeak => "emotional_peak",
            CheckpointTrigger::Accomplishment => "accomplishment",
            CheckpointTrigger::Error => "error",
            CheckpointTrigger::Shutdown => "shutdown",
            CheckpointTrigger::Manual => "manual",
            CheckpointTrigger::Daily => "daily",
        }
    }
}

impl std::fmt::Display for CheckpointTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// STATE SCHEMA
// ============================================================================

/// The full persisted state. Field names are the on-disk schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub trigger: CheckpointTrigger,
    pub relationship: RelationshipState,
    pub scales: TemporalHierarchy,
    pub session: SessionTracker,
    /// Hash of the last projector output, for drift diagnostics.
    #[serde(default)]
    pub projector_hash: String,
    /// Total messages ever admitted.
    #[serde(default)]
    pub messages_admitted: u64,
}

/// One line of the checkpoint index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub trigger: CheckpointTrigger,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointIndex {
    checkpoints: Vec<IndexEntry>,
}

// ============================================================================
// MANAGER
// ============================================================================

/// Owns trigger bookkeeping, the fan-out write protocol, the index and
/// rotation. Confined to the memory task.
#[derive(Debug)]
pub struct CheckpointManager {
    config: CheckpointConfig,
    primary: PathBuf,
    index: CheckpointIndex,
    messages_since: u64,
    last_checkpoint_at: DateTime<Utc>,
    last_checkpoint_date: NaiveDate,
}

impl CheckpointManager {
    /// Open the manager over the primary checkpoint directory, loading
    /// an existing index when present.
    pub fn open(config: CheckpointConfig, primary: impl Into<PathBuf>) -> Result<Self> {
        let primary = primary.into();
        fs::create_dir_all(&primary)?;
        fs::create_dir_all(primary.join("archive"))?;

        let index_path = primary.join("index.json");
        let index = if index_path.exists() {
            serde_json::from_str(&fs::read_to_string(&index_path)?)?
        } else {
            CheckpointIndex::default()
        };

        let now = Utc::now();
        let last_checkpoint_at = index
            .checkpoints
            .last()
            .map(|e| e.created_at)
            .unwrap_or(now);

        Ok(Self {
            config,
            primary,
            index,
            messages_since: 0,
            last_checkpoint_at,
            last_checkpoint_date: last_checkpoint_at.date_naive(),
        })
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index.checkpoints
    }

    pub fn messages_since_checkpoint(&self) -> u64 {
        self.messages_since
    }

    /// Count one admitted message toward the message-interval trigger.
    pub fn note_message(&mut self) {
        self.messages_since += 1;
    }

    // ========================================================================
    // TRIGGER PREDICATES
    // ========================================================================

    /// Cheap poller predicate: message count, elapsed time, date rollover.
    pub fn poll_due(&self, now: DateTime<Utc>) -> Option<CheckpointTrigger> {
        if self.messages_since >= self.config.message_interval {
            return Some(CheckpointTrigger::MessageCount);
        }
        let elapsed = (now - self.last_checkpoint_at).num_seconds();
        if elapsed >= self.config.time_interval_seconds as i64 {
            return Some(CheckpointTrigger::Time);
        }
        if now.date_naive() > self.last_checkpoint_date {
            return Some(CheckpointTrigger::Daily);
        }
        None
    }

    /// Event predicate: does this affect intensity demand a checkpoint?
    pub fn emotion_due(&self, intensity: f64) -> bool {
        intensity >= self.config.emotion_threshold
    }

    // ========================================================================
    // WRITE PROTOCOL
    // ========================================================================

    /// Persist a snapshot to every target. Succeeds when at least one
    /// target took the write; only total loss is an error.
    pub fn write(&mut self, state: &CheckpointState) -> Result<String> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let id = checkpoint_id(state.created_at, &bytes);

        let mut targets = vec![self.primary.clone()];
        targets.extend(self.config.targets.iter().cloned());

        let mut successes = 0usize;
        let mut last_error: Option<EngineError> = None;
        for target in &targets {
            let path = target.join(&id).join("state.json");
            match atomic_write_target(&path, &bytes) {
                Ok(()) => successes += 1,
                Err(e) => {
                    error!(target = %target.display(), error = %e, "checkpoint target failed");
                    last_error = Some(e);
                }
            }
        }

        if successes == 0 {
            return Err(last_error.unwrap_or_else(|| {
                EngineError::Io(std::io::Error::other("no checkpoint target available"))
            }));
        }

        self.index.checkpoints.push(IndexEntry {
            id: id.clone(),
            created_at: state.created_at,
            trigger: state.trigger,
        });

        // The latest pointer moves only after at least one target write
        // succeeded, and BEFORE rotation, so rotation can never archive
        // the snapshot the pointer references.
        atomic_write(&self.primary.join("latest"), id.as_bytes())?;
        self.rotate()?;
        self.persist_index()?;

        self.messages_since = 0;
        self.last_checkpoint_at = state.created_at;
        self.last_checkpoint_date = state.created_at.date_naive();

        info!(
            checkpoint = %id,
            trigger = %state.trigger,
            targets_ok = successes,
            targets_total = targets.len(),
            "checkpoint written"
        );
        Ok(id)
    }

    fn rotate(&mut self) -> Result<()> {
        while self.index.checkpoints.len() > self.config.max_retained {
            // Oldest first; the newest entry is structurally unreachable
            // here because max_retained >= 1.
            let retired = self.index.checkpoints.remove(0);
            if let Err(e) = self.archive_checkpoint(&retired.id) {
                warn!(checkpoint = %retired.id, error = %e, "archive failed; snapshot left in place");
            }
        }
        Ok(())
    }

    /// Compress a retired snapshot into `archive/<id>.json.zst`, then
    /// drop the live directory.
    fn archive_checkpoint(&self, id: &str) -> Result<()> {
        let dir = self.primary.join(id);
        let state_path = dir.join("state.json");
        if state_path.exists() {
            let raw = fs::read(&state_path)?;
            let compressed = zstd::encode_all(raw.as_slice(), 0)
                .map_err(EngineError::Io)?;
            atomic_write(
                &self.primary.join("archive").join(format!("{id}.json.zst")),
                &compressed,
            )?;
        }
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    fn persist_index(&self) -> Result<()> {
        atomic_write(
            &self.primary.join("index.json"),
            &serde_json::to_vec_pretty(&self.index)?,
        )
    }

    // ========================================================================
    // RESTORE
    // ========================================================================

    /// Restore the newest parseable checkpoint, preferring targets in
    /// configuration order. `Ok(None)` means a clean first run.
    pub fn restore_latest(&self) -> Result<Option<CheckpointState>> {
        let mut targets = vec![self.primary.clone()];
        targets.extend(self.config.targets.iter().cloned());

        for target in &targets {
            let pointer = target.join("latest");
            let Ok(id) = fs::read_to_string(&pointer) else {
                continue;
            };
            match load_state(&target.join(id.trim()).join("state.json")) {
                Ok(state) => return Ok(Some(state)),
                Err(e @ EngineError::SchemaMismatch { .. }) => return Err(e),
                Err(e) => {
                    warn!(target = %target.display(), error = %e, "checkpoint target unreadable, trying next");
                }
            }
        }
        Ok(None)
    }

    /// Restore a specific checkpoint by id from the primary target.
    pub fn restore_by_id(&self, id: &str) -> Result<CheckpointState> {
        load_state(&self.primary.join(id).join("state.json"))
    }

    /// Whether the latest pointer resolves to a parseable snapshot.
    pub fn latest_is_sound(&self) -> bool {
        let Ok(id) = fs::read_to_string(self.primary.join("latest")) else {
            return false;
        };
        load_state(&self.primary.join(id.trim()).join("state.json")).is_ok()
    }
}

fn load_state(path: &Path) -> Result<CheckpointState> {
    let raw = fs::read_to_string(path)?;

    // Version gate before full deserialization: unknown versions are
    // refused outright rather than half-parsed.
    #[derive(Deserialize)]
    struct VersionProbe {
        version: u32,
    }
    let probe: VersionProbe = serde_json::from_str(&raw)?;
    if probe.version > CHECKPOINT_SCHEMA_VERSION {
        return Err(EngineError::SchemaMismatch {
            found: probe.version,
            supported: CHECKPOINT_SCHEMA_VERSION,
        });
    }

    Ok(serde_json::from_str(&raw)?)
}

fn checkpoint_id(created_at: DateTime<Utc>, bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!(
        "{}-{:02x}{:02x}{:02x}",
        created_at.format("%Y%m%dT%H%M%S"),
        digest[0],
        digest[1],
        digest[2]
    )
}

// ============================================================================
// TESTS
// ============================================================================
