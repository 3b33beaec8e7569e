//! Engine error taxonomy
//!
//! A closed set of error kinds, one per recovery policy. Component
//! boundaries return `Result<T>`; the orchestrator decides per kind
//! whether to recover locally or escalate with an exit code.

use std::path::PathBuf;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A log line failed to parse. Recovered locally: the source file is
    /// halted at that offset, every other file continues.
    #[error("input parse error in {file} at bytes {start}..{end}: {reason}")]
    InputParse {
        file: PathBuf,
        start: u64,
        end: u64,
        reason: String,
    },

    /// The affect backend timed out or errored. Recovered by falling back
    /// to the rules-based scorer at reduced confidence.
    #[error("analyzer backend unavailable: {0}")]
    AnalyzerUnavailable(String),

    /// A state write failed for one target. Recovered while at least one
    /// target succeeds; fatal only on total loss.
    #[error("state I/O failure for {target}: {source}")]
    StateIo {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted artifact declared a schema this build does not speak.
    #[error("schema mismatch: found version {found}, supported {supported}")]
    SchemaMismatch { found: u32, supported: u32 },

    /// Another instance holds the state-directory lock.
    #[error("state directory locked by another process (pid file: {0})")]
    LockContention(PathBuf),

    /// The living-equation step diverged. Recovered by rollback.
    #[error("integrator divergence at t={t:.3}s: {reason}")]
    IntegratorDivergence { t: f64, reason: String },

    /// Invalid configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error outside the fan-out write path
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error on a state artifact
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Map an error kind to the process exit code contract:
    /// 2 config, 3 lock contention, 4 schema mismatch, 5 fatal I/O, 1 other.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config(_) => 2,
            EngineError::LockContention(_) => 3,
            EngineError::SchemaMismatch { .. } => 4,
            EngineError::StateIo { .. } | EngineError::Io(_) => 5,
            _ => 1,
        }
    }

    /// Whether the orchestrator may continue after logging this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InputParse { .. }
                | EngineError::AnalyzerUnavailable(_)
                | EngineError::IntegratorDivergence { .. }
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
