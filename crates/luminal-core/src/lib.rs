//! # Luminal Core
//!
//! Persistent conversational memory engine. Ingests append-only chat
//! logs, distills each message into affective and semantic state, and
//! maintains a multi-timescale memory whose current summary is
//! continuously re-projected into a session-startup briefing:
//!
//! - **Watcher**: tails a directory of append-only JSONL logs with
//!   resumable offsets and at-least-once, crash-safe delivery
//! - **Affect**: PAD dimensional model (Mehrabian & Russell, 1974) plus a
//!   frozen categorical vocabulary, behind a pluggable scoring backend
//! - **Living Equation**: 5-dimensional nonlinear relationship dynamics,
//!   integrated with adaptive RK45
//! - **Temporal Hierarchy**: four Ebbinghaus-style retention scales with
//!   importance-weighted migration and compression
//! - **Checkpoints**: multi-trigger, atomic, fan-out snapshots with
//!   rotation and zstd archiving
//! - **Projector**: deterministic briefing + realtime state files
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use luminal_core::{AffectAnalyzer, Config, MemoryEngine, StateDir};
//!
//! let mut state = StateDir::open("/var/lib/luminal/state")?;
//! state.lock()?;
//! let mut engine = MemoryEngine::open(Config::default(), state, AffectAnalyzer::rules())?;
//!
//! // Feed it a message; memory, affect, relationship and briefing all move.
//! let report = engine.ingest(message)?;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod affect;
pub mod backfill;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod equation;
pub mod error;
pub mod hierarchy;
pub mod message;
pub mod offsets;
pub mod projector;
pub mod scoring;
pub mod session;
pub mod statedir;
pub mod watcher;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Affect analysis
pub use affect::{
    ALL_EMOTIONS, Affect, AffectAnalyzer, AffectBackend, Emotion, MoodWindow, Pad, RawAffect,
    RulesBackend, SpeakerAffect, coalesce_speaker_windows, extractive_summary, pad_to_emotion,
};

// History backfill
pub use backfill::{BackfillReport, run_backfill};

// Checkpointing
pub use checkpoint::{
    CHECKPOINT_SCHEMA_VERSION, CheckpointManager, CheckpointState, CheckpointTrigger, IndexEntry,
};

// Configuration
pub use config::{
    AnalyzerBackendKind, AnalyzerConfig, CheckpointConfig, Config, IdentityConfig, LandmarkConfig,
    LivingEquationConfig, OrchestratorConfig, ScaleConfig, ScalesConfig, ScoringConfig,
    ScoringWeights, WatcherConfig,
};

// Engine
pub use engine::{HealthSnapshot, IngestReport, MemoryEngine};

// Living equation
pub use equation::{
    EquationContext, EventKind, LivingEquation, RelationshipState, StabilityForecast,
};

// Errors
pub use error::{EngineError, Result};

// Temporal hierarchy
pub use hierarchy::{
    AdmitOutcome, ConsolidationReport, EntryKind, LANDMARK_KINDS, MemoryEntry, MemoryScale,
    ScaleStore, TemporalHierarchy,
};

// Messages
pub use message::{Message, Speaker, stable_id};

// Offsets
pub use offsets::{OffsetStore, source_key};

// Projection
pub use projector::{ProjectorContext, StateProjector};

// Scoring & compression
pub use scoring::{Compressor, ImportanceScorer};

// Sessions
pub use session::SessionTracker;

// State directory
pub use statedir::{StateDir, atomic_write};

// Watcher
pub use watcher::{LogWatcher, WatcherEvent};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Affect, AffectAnalyzer, AffectBackend, CheckpointManager, CheckpointTrigger, Config,
        Emotion, EngineError, EntryKind, LivingEquation, LogWatcher, MemoryEngine, MemoryScale,
        Message, Pad, RelationshipState, Result, RulesBackend, SessionTracker, Speaker, StateDir,
        StateProjector, TemporalHierarchy,
    };
}
