//! Engine configuration
//!
//! TOML-backed configuration tree. Every section and every field defaults
//! independently, so a partial config file (or none at all) always yields
//! a runnable engine. Numeric defaults are the long-observed production
//! values of the memory service this engine replaces.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ============================================================================
// SCALES
// ============================================================================

/// Per-scale retention parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// Retention half-life in seconds. `None` disables decay (lifetime).
    pub half_life_seconds: Option<u64>,
    /// Soft upper bound on resident entries.
    pub soft_capacity: usize,
    /// Top-k entries kept verbatim on migration INTO this scale.
    pub top_k_migration: usize,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            half_life_seconds: Some(3600),
            soft_capacity: 256,
            top_k_migration: 16,
        }
    }
}

/// The four-scale hierarchy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalesConfig {
    pub immediate: ScaleConfig,
    pub short_term: ScaleConfig,
    pub long_term: ScaleConfig,
    pub lifetime: ScaleConfig,
}

impl Default for ScalesConfig {
    fn default() -> Self {
        Self {
            immediate: ScaleConfig {
                half_life_seconds: Some(3600), // ~1 hour
                soft_capacity: 512,
                top_k_migration: 64,
            },
            short_term: ScaleConfig {
                half_life_seconds: Some(3 * 86_400), // ~3 days
                soft_capacity: 256,
                top_k_migration: 32,
            },
            long_term: ScaleConfig {
                half_life_seconds: Some(60 * 86_400), // ~60 days
                soft_capacity: 128,
                top_k_migration: 16,
            },
            lifetime: ScaleConfig {
                half_life_seconds: None, // never decays
                soft_capacity: usize::MAX,
                top_k_migration: 8,
            },
        }
    }
}

// ============================================================================
// SCORING
// ============================================================================

/// Importance scorer weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub affect: f64,
    pub landmark: f64,
    pub recency: f64,
    pub access: f64,
    pub keyword: f64,
    pub relation: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            affect: 3.0,
            landmark: 2.0,
            recency: 1.0,
            access: 0.5,
            keyword: 1.5,
            relation: 2.5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: ScoringWeights,
    /// Keywords that earn the keyword bonus per hit.
    pub keywords: Vec<String>,
}

// ============================================================================
// LANDMARKS
// ============================================================================

/// Landmark detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarkConfig {
    /// Affect intensity at or above which a message is an emotional peak.
    pub intensity_threshold: f64,
    /// Content markers for accomplishments (matched lowercase, substring).
    pub accomplishment_markers: Vec<String>,
    /// Content markers for regrets.
    pub regret_markers: Vec<String>,
    /// Phrases whose first occurrence is a milestone.
    pub milestone_phrases: Vec<String>,
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self {
            intensity_threshold: 0.8,
            accomplishment_markers: vec![
                "finished".into(),
                "completed".into(),
                "fixed".into(),
                "solved".into(),
                "built".into(),
                "shipped".into(),
                "deployed".into(),
                "breakthrough".into(),
                "achievement".into(),
                "we did it".into(),
                "it works".into(),
                "proud".into(),
            ],
            regret_markers: vec![
                "sorry".into(),
                "regret".into(),
                "mistake".into(),
                "my fault".into(),
                "wish i had".into(),
                "shouldn't have".into(),
                "apologize".into(),
            ],
            milestone_phrases: vec![
                "first time".into(),
                "never forget".into(),
                "always remember".into(),
                "milestone".into(),
                "anniversary".into(),
            ],
        }
    }
}

// ============================================================================
// CHECKPOINTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Checkpoint after this many messages since the last one.
    pub message_interval: u64,
    /// Checkpoint after this many seconds since the last one.
    pub time_interval_seconds: u64,
    /// Checkpoint when affect intensity reaches this threshold.
    pub emotion_threshold: f64,
    /// How many uncompressed checkpoints stay on disk.
    pub max_retained: usize,
    /// Ordered fan-out target directories. Empty means primary only
    /// (`<state>/checkpoints`).
    pub targets: Vec<PathBuf>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            message_interval: 50,
            time_interval_seconds: 1800,
            emotion_threshold: 0.85,
            max_retained: 20,
            targets: Vec::new(),
        }
    }
}

// ============================================================================
// ANALYZER
// ============================================================================

/// Which affect backend scores messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerBackendKind {
    /// Local model endpoint (deployment-provided).
    Local,
    /// Remote model endpoint (deployment-provided).
    Remote,
    /// Deterministic lexicon scorer, always available.
    #[default]
    Rules,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub backend: AnalyzerBackendKind,
    /// Backend call timeout in seconds.
    pub timeout_seconds: u64,
    /// Bounded analyzer worker pool size.
    pub workers: usize,
    /// Messages per scoring batch in steady state.
    pub batch_size: usize,
    /// Messages per scoring batch during backfill.
    pub backfill_batch_size: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            backend: AnalyzerBackendKind::Rules,
            timeout_seconds: 10,
            workers: 2,
            batch_size: 16,
            backfill_batch_size: 128,
        }
    }
}

// ============================================================================
// LIVING EQUATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivingEquationConfig {
    /// Natural decay rate applied to the first four components.
    pub lambda_decay: f64,
    /// Speaker-pair coupling strength in the connection term.
    pub coupling_strength: f64,
    /// Minimum connection before growth turns positive.
    pub growth_threshold: f64,
    /// Base phase advance rate.
    pub phase_velocity: f64,
    /// 4x4 pairwise interaction coefficients, row-major.
    pub interaction_matrix: [[f64; 4]; 4],
}

impl Default for LivingEquationConfig {
    fn default() -> Self {
        Self {
            lambda_decay: 0.1,
            coupling_strength: 0.8,
            growth_threshold: 0.3,
            phase_velocity: 0.5,
            interaction_matrix: [
                [1.0, 0.5, 0.3, 0.7],
                [0.5, 1.0, 0.4, 0.3],
                [0.2, 0.4, 1.0, 0.5],
                [0.6, 0.3, 0.5, 1.0],
            ],
        }
    }
}

// ============================================================================
// WATCHER / ORCHESTRATOR / IDENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Debounce window for file-change bursts, in milliseconds.
    pub debounce_ms: u64,
    /// Retry backoff base in milliseconds.
    pub backoff_base_ms: u64,
    /// Retry backoff cap in milliseconds.
    pub backoff_cap_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            backoff_base_ms: 100,
            backoff_cap_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Consolidation pass cadence in seconds.
    pub consolidation_interval_seconds: u64,
    /// Checkpoint predicate poll cadence in seconds.
    pub checkpoint_poll_seconds: u64,
    /// Health snapshot cadence in seconds.
    pub health_interval_seconds: u64,
    /// Bounded command-channel capacity (back-pressure point).
    pub channel_capacity: usize,
    /// Progress log cadence during backfill, in files.
    pub backfill_progress_every: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            consolidation_interval_seconds: 900,
            checkpoint_poll_seconds: 5,
            health_interval_seconds: 30,
            channel_capacity: 256,
            backfill_progress_every: 25,
        }
    }
}

/// Fixed identity block rendered at the top of the briefing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub assistant_name: String,
    pub user_name: String,
    pub relationship: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            assistant_name: "Assistant".to_string(),
            user_name: "User".to_string(),
            relationship: "long-running collaboration".to_string(),
        }
    }
}

// ============================================================================
// ROOT CONFIG
// ============================================================================

/// Root configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scales: ScalesConfig,
    pub scoring: ScoringConfig,
    pub landmarks: LandmarkConfig,
    pub checkpoint: CheckpointConfig,
    pub analyzer: AnalyzerConfig,
    pub living_equation: LivingEquationConfig,
    pub watcher: WatcherConfig,
    pub orchestrator: OrchestratorConfig,
    pub identity: IdentityConfig,
    /// Conversation seeds rendered into the briefing, at most this many.
    pub max_conversation_seeds: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scales: ScalesConfig::default(),
            scoring: ScoringConfig::default(),
            landmarks: LandmarkConfig::default(),
            checkpoint: CheckpointConfig::default(),
            analyzer: AnalyzerConfig::default(),
            living_equation: LivingEquationConfig::default(),
            watcher: WatcherConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            identity: IdentityConfig::default(),
            max_conversation_seeds: 5,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for
    /// every absent section and field.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|e| EngineError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config path: explicit flag, then `CONFIG_PATH`, then none.
    pub fn resolve_path(flag: Option<PathBuf>) -> Option<PathBuf> {
        flag.or_else(|| env::var("CONFIG_PATH").ok().map(PathBuf::from))
    }

    /// Load from an optional path, defaulting when no file is configured.
    pub fn load_or_default(path: Option<PathBuf>) -> Result<Self> {
        match Self::resolve_path(path) {
            Some(p) => Self::load(&p),
            None => {
                let mut config = Config::default();
                config.normalize();
                Ok(config)
            }
        }
    }

    fn normalize(&mut self) {
        if self.max_conversation_seeds == 0 {
            self.max_conversation_seeds = 5;
        }
        // Lifetime never decays regardless of what the file says.
        self.scales.lifetime.half_life_seconds = None;
    }

    /// Validate invariants that defaults cannot repair.
    pub fn validate(&self) -> Result<()> {
        for (name, scale) in [
            ("immediate", &self.scales.immediate),
            ("short_term", &self.scales.short_term),
            ("long_term", &self.scales.long_term),
        ] {
            match scale.half_life_seconds {
                Some(0) | None => {
                    return Err(EngineError::Config(format!(
                        "scales.{name}.half_life_seconds must be a positive integer"
                    )));
                }
                Some(_) => {}
            }
            if scale.top_k_migration == 0 {
                return Err(EngineError::Config(format!(
                    "scales.{name}.top_k_migration must be at least 1"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.landmarks.intensity_threshold) {
            return Err(EngineError::Config(
                "landmarks.intensity_threshold must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.checkpoint.emotion_threshold) {
            return Err(EngineError::Config(
                "checkpoint.emotion_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.checkpoint.message_interval == 0 {
            return Err(EngineError::Config(
                "checkpoint.message_interval must be at least 1".to_string(),
            ));
        }
        if self.checkpoint.max_retained == 0 {
            return Err(EngineError::Config(
                "checkpoint.max_retained must be at least 1".to_string(),
            ));
        }
        if self.analyzer.workers == 0 || self.analyzer.batch_size == 0 {
            return Err(EngineError::Config(
                "analyzer.workers and analyzer.batch_size must be at least 1".to_string(),
            ));
        }
        if self.living_equation.lambda_decay < 0.0 {
            return Err(EngineError::Config(
                "living_equation.lambda_decay must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
