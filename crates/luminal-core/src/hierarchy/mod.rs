//! # Temporal Memory Hierarchy
//!
//! Four retention scales with Ebbinghaus-style forgetting and
//! importance-weighted compression:
//!
//! 1. **Admission**: every message lands in Immediate exactly once
//!    (at-least-once delivery upstream, deduplicated here by message id).
//! 2. **Landmarks**: emotional peaks, accomplishments, regrets and
//!    milestones are copied into Lifetime the moment they are detected.
//!    Lifetime never forgets.
//! 3. **Migration**: a consolidation pass moves entries older than 2×
//!    half-life up a scale; the top-k by importance survive verbatim,
//!    the rest fold into a rolling Summary.

mod entry;
mod scale;

pub use entry::{EntryKind, LANDMARK_KINDS, MemoryEntry};
pub use scale::{MemoryScale, ScaleStore};

use std::collections::{BTreeSet, HashSet};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::affect::{Affect, AffectBackend};
use crate::config::{LandmarkConfig, ScalesConfig};
use crate::message::Message;
use crate::scoring::{Compressor, ImportanceScorer};

// ============================================================================
// ADMISSION OUTCOME
// ============================================================================

/// What happened when a message was offered to the hierarchy.
#[derive(Debug, Clone, Default)]
pub struct AdmitOutcome {
    /// False when dedup recognized a duplicate delivery.
    pub admitted: bool,
    pub entry_id: String,
    /// Landmark kinds detected for this message.
    pub landmarks: Vec<EntryKind>,
}

/// One consolidation pass, summarized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationReport {
    pub migrated: usize,
    pub summarized: usize,
    pub pruned: usize,
    pub duration_ms: u64,
}

// ============================================================================
// HIERARCHY
// ============================================================================

/// The four-scale temporal memory. All mutation goes through the owning
/// memory task; this type is plain state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalHierarchy {
    immediate: ScaleStore,
    short_term: ScaleStore,
    long_term: ScaleStore,
    lifetime: ScaleStore,
    /// Message ids ever admitted; the exactly-once backstop.
    seen_message_ids: HashSet<String>,
    /// Milestone phrases already consumed (first occurrence only).
    milestone_phrases_seen: HashSet<String>,
    /// Days that already produced a daily-first milestone.
    days_seen: BTreeSet<NaiveDate>,
    /// Whether the first-session milestone fired.
    first_session_recorded: bool,
}

impl TemporalHierarchy {
    pub fn new(config: &ScalesConfig) -> Self {
        Self {
            immediate: ScaleStore::new(MemoryScale::Immediate, &config.immediate),
            short_term: ScaleStore::new(MemoryScale::ShortTerm, &config.short_term),
            long_term: ScaleStore::new(MemoryScale::LongTerm, &config.long_term),
            lifetime: ScaleStore::new(MemoryScale::Lifetime, &config.lifetime),
            seen_message_ids: HashSet::new(),
            milestone_phrases_seen: HashSet::new(),
            days_seen: BTreeSet::new(),
            first_session_recorded: false,
        }
    }

    pub fn scale(&self, scale: MemoryScale) -> &ScaleStore {
        match scale {
            MemoryScale::Immediate => &self.immediate,
            MemoryScale::ShortTerm => &self.short_term,
            MemoryScale::LongTerm => &self.long_term,
            MemoryScale::Lifetime => &self.lifetime,
        }
    }

    fn scale_mut(&mut self, scale: MemoryScale) -> &mut ScaleStore {
        match scale {
            MemoryScale::Immediate => &mut self.immediate,
            MemoryScale::ShortTerm => &mut self.short_term,
            MemoryScale::LongTerm => &mut self.long_term,
            MemoryScale::Lifetime => &mut self.lifetime,
        }
    }

    pub fn total_entries(&self) -> usize {
        MemoryScale::ALL
            .iter()
            .map(|s| self.scale(*s).len())
            .sum()
    }

    /// Whether a message id was ever admitted.
    pub fn has_seen(&self, message_id: &str) -> bool {
        self.seen_message_ids.contains(message_id)
    }

    // ========================================================================
    // ADMISSION
    // ========================================================================

    /// Offer a message to the hierarchy. Duplicates are recognized by
    /// message id and refused; everything else lands in Immediate, with
    /// landmark copies fanned into Lifetime.
    pub fn admit(
        &mut self,
        message: &Message,
        affect: Option<Affect>,
        relationship_delta: f64,
        landmarks: &LandmarkConfig,
    ) -> AdmitOutcome {
        if !self.seen_message_ids.insert(message.message_id.clone()) {
            debug!(message_id = %message.message_id, "duplicate delivery ignored");
            return AdmitOutcome {
                admitted: false,
                entry_id: message.message_id.clone(),
                landmarks: Vec::new(),
            };
        }

        let detected = if message.is_separator() {
            Vec::new()
        } else {
            self.detect_landmarks(message, affect.as_ref(), landmarks)
        };

        let mut entry = MemoryEntry::from_message(
            message,
            affect.unwrap_or_default(),
            relationship_delta,
        );
        entry.landmark = !detected.is_empty();

        for kind in &detected {
            let copy = entry.as_landmark(*kind);
            self.lifetime.insert(copy);
        }

        let entry_id = entry.entry_id.clone();
        self.immediate.insert(entry);

        AdmitOutcome {
            admitted: true,
            entry_id,
            landmarks: detected,
        }
    }

    fn detect_landmarks(
        &mut self,
        message: &Message,
        affect: Option<&Affect>,
        config: &LandmarkConfig,
    ) -> Vec<EntryKind> {
        let mut kinds = Vec::new();
        let lowered = message.content.to_lowercase();

        if let Some(affect) = affect {
            if affect.intensity >= config.intensity_threshold {
                kinds.push(EntryKind::EmotionalPeak);
            }
        }

        let pleasure = affect.map(|a| a.pad.pleasure).unwrap_or_default();
        if pleasure > 0.0
            && config
                .accomplishment_markers
                .iter()
                .any(|m| lowered.contains(&m.to_lowercase()))
        {
            kinds.push(EntryKind::Accomplishment);
        }

        if config
            .regret_markers
            .iter()
            .any(|m| lowered.contains(&m.to_lowercase()))
        {
            kinds.push(EntryKind::Regret);
        }

        if self.detect_milestone(message, &lowered, config) {
            kinds.push(EntryKind::Milestone);
        }

        kinds
    }

    fn detect_milestone(
        &mut self,
        message: &Message,
        lowered: &str,
        config: &LandmarkConfig,
    ) -> bool {
        let mut milestone = false;

        for phrase in &config.milestone_phrases {
            let key = phrase.to_lowercase();
            if lowered.contains(&key) && self.milestone_phrases_seen.insert(key) {
                milestone = true;
            }
        }

        if !self.first_session_recorded {
            self.first_session_recorded = true;
            milestone = true;
        }

        if self.days_seen.insert(message.timestamp.date_naive()) {
            milestone = true;
        }

        milestone
    }

    // ========================================================================
    // ACCESS
    // ========================================================================

    /// Re-insert an entry recovered from a scale log during restore.
    ///
    /// Entries already present in the snapshot are skipped; a recovered
    /// raw message re-registers its id in the dedup set so the
    /// exactly-once guarantee holds across the crash. Returns true when
    /// the entry was genuinely missing.
    pub fn restore_entry(&mut self, scale: MemoryScale, entry: MemoryEntry) -> bool {
        if entry.kind == EntryKind::RawMessage {
            // RawMessage entry ids are message ids.
            self.seen_message_ids.insert(entry.entry_id.clone());
        }
        if MemoryScale::ALL
            .iter()
            .any(|s| self.scale(*s).contains(&entry.entry_id))
        {
            return false;
        }
        self.scale_mut(scale).insert(entry)
    }

    /// Update an entry's captured relationship shift (set once the
    /// discrete event for its message has been applied).
    pub fn set_relationship_delta(&mut self, entry_id: &str, delta: f64) {
        for scale in MemoryScale::ALL {
            if let Some(entry) = self.scale_mut(scale).get_mut(entry_id) {
                entry.relationship_delta = delta;
            }
        }
    }

    /// Record a retrieval of an entry wherever it lives.
    pub fn access(&mut self, entry_id: &str, now: DateTime<Utc>) -> bool {
        for scale in MemoryScale::ALL {
            if let Some(entry) = self.scale_mut(scale).get_mut(entry_id) {
                entry.record_access(now);
                return true;
            }
        }
        false
    }

    /// Record a retrieval of the newest `max` Lifetime landmarks (the
    /// set a projection surfaces). Retrieval feeds back into retention:
    /// recalled memories hold their weight.
    pub fn touch_recalled_landmarks(&mut self, max: usize, now: DateTime<Utc>) -> usize {
        let mut ids: Vec<(DateTime<Utc>, String)> = self
            .lifetime
            .entries()
            .iter()
            .filter(|e| e.kind.is_landmark())
            .map(|e| (e.timestamp, e.entry_id.clone()))
            .collect();
        ids.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut touched = 0;
        for (_, id) in ids.into_iter().take(max) {
            if let Some(entry) = self.lifetime.get_mut(&id) {
                entry.record_access(now);
                touched += 1;
            }
        }
        touched
    }

    // ========================================================================
    // CONSOLIDATION
    // ========================================================================

    /// Run one consolidation pass: migrate aged entries coarse-ward with
    /// importance-weighted selection, then prune to soft capacities.
    pub fn consolidate(
        &mut self,
        now: DateTime<Utc>,
        scorer: &ImportanceScorer,
        backend: Option<&dyn AffectBackend>,
    ) -> ConsolidationReport {
        let started = Instant::now();
        let mut report = ConsolidationReport::default();

        for (from, to) in [
            (MemoryScale::Immediate, MemoryScale::ShortTerm),
            (MemoryScale::ShortTerm, MemoryScale::LongTerm),
            (MemoryScale::LongTerm, MemoryScale::Lifetime),
        ] {
            self.migrate_scale(from, to, now, scorer, backend, &mut report);
        }

        for scale in [
            MemoryScale::Immediate,
            MemoryScale::ShortTerm,
            MemoryScale::LongTerm,
        ] {
            report.pruned += self.scale_mut(scale).prune_to_capacity(now).len();
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        if report.migrated + report.summarized + report.pruned > 0 {
            info!(
                migrated = report.migrated,
                summarized = report.summarized,
                pruned = report.pruned,
                duration_ms = report.duration_ms,
                "consolidation pass complete"
            );
        }
        report
    }

    fn migrate_scale(
        &mut self,
        from: MemoryScale,
        to: MemoryScale,
        now: DateTime<Utc>,
        scorer: &ImportanceScorer,
        backend: Option<&dyn AffectBackend>,
        report: &mut ConsolidationReport,
    ) {
        let source = self.scale_mut(from);
        let Some(threshold) = source.migration_threshold_seconds() else {
            return;
        };
        let half_life = source.half_life_seconds;
        let mut eligible = source.drain_older_than(now, threshold);
        if eligible.is_empty() {
            return;
        }

        scorer.rank(&mut eligible, now, half_life);

        let keep = self.scale(to).top_k_migration.min(eligible.len());
        let remainder = eligible.split_off(keep);

        for mut entry in eligible {
            // Raw content migrating into Lifetime travels as a Summary of
            // itself; Lifetime's buckets hold landmarks and summaries only.
            if to == MemoryScale::Lifetime && entry.kind == EntryKind::RawMessage {
                entry.refs = vec![entry.entry_id.clone()];
                entry.entry_id = format!("summary-{}", entry.entry_id);
                entry.kind = EntryKind::Summary;
            }
            if self.scale_mut(to).insert(entry) {
                report.migrated += 1;
            }
        }

        if !remainder.is_empty() {
            if let Some(summary) = Compressor::summarize(&remainder, backend) {
                if self.scale_mut(to).insert(summary) {
                    report.summarized += remainder.len();
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
