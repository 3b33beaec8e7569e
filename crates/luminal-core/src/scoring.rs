//! Importance scoring and compression
//!
//! The scorer turns an entry into a single non-negative number that
//! drives every migration decision. The compressor folds a batch of
//! migrating entries into one Summary entry carrying the batch's date
//! range, size, dominant emotion, mean PAD and landmark references.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::affect::{Affect, AffectBackend, Emotion, Pad, extractive_summary};
use crate::config::ScoringConfig;
use crate::hierarchy::{EntryKind, MemoryEntry};

// ============================================================================
// IMPORTANCE SCORER
// ============================================================================

/// Weighted-sum importance scorer.
#[derive(Debug, Clone)]
pub struct ImportanceScorer {
    config: ScoringConfig,
}

impl ImportanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score one entry at `now`, relative to the half-life of the scale
    /// it currently lives in.
    pub fn score(
        &self,
        entry: &MemoryEntry,
        now: DateTime<Utc>,
        scale_half_life_seconds: Option<u64>,
    ) -> f64 {
        let w = &self.config.weights;

        let affect_term = entry
            .affect
            .as_ref()
            .map(|a| a.intensity)
            .unwrap_or_default();

        let landmark_bonus = if entry.landmark || entry.kind.is_landmark() {
            1.0
        } else {
            0.0
        };

        let recency = match scale_half_life_seconds {
            Some(half_life) if half_life > 0 => {
                let age = entry.age_seconds(now).max(0) as f64;
                (-age / half_life as f64).exp()
            }
            _ => 1.0,
        };

        let access = (1.0 + entry.access_count as f64).ln();

        let keyword_hits = self.keyword_hits(&entry.content) as f64;

        let score = w.affect * affect_term
            + w.landmark * landmark_bonus
            + w.recency * recency
            + w.access * access
            + w.keyword * keyword_hits
            + w.relation * entry.relationship_delta.abs();

        score.max(0.0)
    }

    fn keyword_hits(&self, content: &str) -> usize {
        if self.config.keywords.is_empty() {
            return 0;
        }
        let lowered = content.to_lowercase();
        self.config
            .keywords
            .iter()
            .filter(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()))
            .count()
    }

    /// Sort eligible entries for migration: best first, ties broken by
    /// newer timestamp, then lexicographic id.
    pub fn rank(
        &self,
        entries: &mut Vec<MemoryEntry>,
        now: DateTime<Utc>,
        scale_half_life_seconds: Option<u64>,
    ) {
        for entry in entries.iter_mut() {
            entry.importance = self.score(entry, now, scale_half_life_seconds);
        }
        entries.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
    }
}

// ============================================================================
// COMPRESSOR
// ============================================================================

/// Folds migrating remainders into Summary entries.
pub struct Compressor;

impl Compressor {
    /// Build a Summary standing in for `sources`.
    ///
    /// Text comes from the backend's `summarize` capability; when that
    /// fails the deterministic extractive heuristic takes over and the
    /// Summary's confidence is reduced.
    pub fn summarize(
        sources: &[MemoryEntry],
        backend: Option<&dyn AffectBackend>,
    ) -> Option<MemoryEntry> {
        if sources.is_empty() {
            return None;
        }

        let texts: Vec<&str> = sources.iter().map(|e| e.content.as_str()).collect();
        let (body, degraded) = match backend {
            Some(backend) => match backend.summarize(&texts) {
                Ok(summary) if !summary.trim().is_empty() => (summary, false),
                Ok(_) => (extractive_summary(&texts, 3), true),
                Err(e) => {
                    warn!(error = %e, "summarize backend failed, using extractive heuristic");
                    (extractive_summary(&texts, 3), true)
                }
            },
            None => (extractive_summary(&texts, 3), true),
        };

        let first = sources
            .iter()
            .map(|e| e.timestamp)
            .min()
            .unwrap_or_else(Utc::now);
        let last = sources
            .iter()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or_else(Utc::now);

        let dominant = dominant_emotion(sources);
        let pads: Vec<Pad> = sources
            .iter()
            .filter_map(|e| e.affect.as_ref().map(|a| a.pad))
            .collect();
        let mean_pad = Pad::mean(&pads);

        let landmark_refs: Vec<String> = sources
            .iter()
            .filter(|e| e.landmark)
            .map(|e| e.entry_id.clone())
            .collect();

        let refs: Vec<String> = sources.iter().map(|e| e.entry_id.clone()).collect();
        let entry_id = summary_id(&refs);

        let header = format!(
            "[{} .. {}] {} entries, dominant {}",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d"),
            sources.len(),
            dominant,
        );
        let content = if landmark_refs.is_empty() {
            format!("{header}\n{body}")
        } else {
            format!("{header}\n{body}\nlandmarks: {}", landmark_refs.join(", "))
        };

        let confidence = if degraded { 0.3 } else { 0.7 };
        let affect = Affect {
            pad: mean_pad,
            primary_emotion: dominant,
            secondary: Vec::new(),
            intensity: mean_pad.intensity(),
            per_speaker: Default::default(),
            confidence,
        };

        // The Summary inherits the batch's strongest importance so the
        // compressed window competes fairly at the next migration.
        let importance = sources
            .iter()
            .map(|e| e.importance)
            .fold(0.0_f64, f64::max);
        let relationship_delta = sources
            .iter()
            .map(|e| e.relationship_delta.abs())
            .fold(0.0_f64, f64::max);

        Some(MemoryEntry {
            entry_id,
            kind: EntryKind::Summary,
            content,
            timestamp: last,
            affect: Some(affect),
            importance,
            access_count: 0,
            last_accessed: last,
            refs,
            session_id: sources
                .last()
                .map(|e| e.session_id.clone())
                .unwrap_or_default(),
            landmark: false,
            relationship_delta,
        })
    }
}

/// Mode of the sources' primary emotions; Neutral when nothing carries
/// affect. Ties resolve by vocabulary declaration order.
fn dominant_emotion(sources: &[MemoryEntry]) -> Emotion {
    let mut counts: HashMap<Emotion, usize> = HashMap::new();
    for entry in sources {
        if let Some(affect) = &entry.affect {
            *counts.entry(affect.primary_emotion).or_default() += 1;
        }
    }
    crate::affect::ALL_EMOTIONS
        .iter()
        .filter_map(|e| counts.get(e).map(|n| (*e, *n)))
        .max_by(|a, b| a.1.cmp(&b.1))
        .map(|(e, _)| e)
        .unwrap_or(Emotion::Neutral)
}

fn summary_id(refs: &[String]) -> String {
    let mut hasher = Sha256::new();
    for r in refs {
        hasher.update(r.as_bytes());
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    let mut out = String::from("summary-");
    for byte in digest.iter().take(12) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
