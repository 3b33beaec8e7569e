//! Memory scales
//!
//! Four retention tiers, Ebbinghaus-style: Immediate (≈1 h half-life),
//! ShortTerm (≈3 d), LongTerm (≈60 d), Lifetime (no decay). Each scale
//! keeps an ordered collection of entries plus the parameters that drive
//! migration and pruning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ScaleConfig;
use crate::hierarchy::entry::{EntryKind, MemoryEntry};

// ============================================================================
// SCALE IDENTIFIERS
// ============================================================================

/// The four temporal scales, ordered coarse-ward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScale {
    Immediate,
    ShortTerm,
    LongTerm,
    Lifetime,
}

impl MemoryScale {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryScale::Immediate => "immediate",
            MemoryScale::ShortTerm => "short_term",
            MemoryScale::LongTerm => "long_term",
            MemoryScale::Lifetime => "lifetime",
        }
    }

    /// The scale entries migrate into, if any.
    pub fn next(&self) -> Option<MemoryScale> {
        match self {
            MemoryScale::Immediate => Some(MemoryScale::ShortTerm),
            MemoryScale::ShortTerm => Some(MemoryScale::LongTerm),
            MemoryScale::LongTerm => Some(MemoryScale::Lifetime),
            MemoryScale::Lifetime => None,
        }
    }

    pub const ALL: [MemoryScale; 4] = [
        MemoryScale::Immediate,
        MemoryScale::ShortTerm,
        MemoryScale::LongTerm,
        MemoryScale::Lifetime,
    ];
}

impl std::fmt::Display for MemoryScale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SCALE STORE
// ============================================================================

/// One scale's resident entries plus retention parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleStore {
    pub scale: MemoryScale,
    /// `None` disables decay and migration (Lifetime).
    pub half_life_seconds: Option<u64>,
    pub soft_capacity: usize,
    /// Top-k kept verbatim on migration INTO this scale.
    pub top_k_migration: usize,
    /// Ordered by timestamp, oldest first.
    entries: Vec<MemoryEntry>,
}

impl ScaleStore {
    pub fn new(scale: MemoryScale, config: &ScaleConfig) -> Self {
        Self {
            scale,
            half_life_seconds: config.half_life_seconds,
            soft_capacity: config.soft_capacity,
            top_k_migration: config.top_k_migration,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        self.entries.iter().any(|e| e.entry_id == entry_id)
    }

    pub fn get_mut(&mut self, entry_id: &str) -> Option<&mut MemoryEntry> {
        self.entries.iter_mut().find(|e| e.entry_id == entry_id)
    }

    /// Insert preserving timestamp order. Duplicate ids are dropped.
    pub fn insert(&mut self, entry: MemoryEntry) -> bool {
        if self.contains(&entry.entry_id) {
            return false;
        }
        let position = self
            .entries
            .partition_point(|e| e.timestamp <= entry.timestamp);
        self.entries.insert(position, entry);
        true
    }

    /// Remove and return every entry older than `threshold_seconds`.
    pub fn drain_older_than(
        &mut self,
        now: DateTime<Utc>,
        threshold_seconds: u64,
    ) -> Vec<MemoryEntry> {
        let cutoff = now - chrono::Duration::seconds(threshold_seconds as i64);
        let split = self.entries.partition_point(|e| e.timestamp < cutoff);
        self.entries.drain(..split).collect()
    }

    /// Age in seconds past which residents become migration-eligible
    /// (2× half-life). `None` for Lifetime.
    pub fn migration_threshold_seconds(&self) -> Option<u64> {
        self.half_life_seconds.map(|h| h * 2)
    }

    /// Drop the lowest-retention entries down to the soft capacity.
    /// Returns the ids of pruned entries, oldest-weakest first.
    pub fn prune_to_capacity(&mut self, now: DateTime<Utc>) -> Vec<String> {
        if self.entries.len() <= self.soft_capacity {
            return Vec::new();
        }
        let excess = self.entries.len() - self.soft_capacity;
        let half_life = self.half_life_seconds;

        let mut weighted: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, e.retention_weight(now, half_life)))
            .collect();
        weighted.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut doomed: Vec<usize> = weighted.into_iter().take(excess).map(|(i, _)| i).collect();
        doomed.sort_unstable_by(|a, b| b.cmp(a));

        let mut pruned = Vec::with_capacity(doomed.len());
        for index in doomed {
            pruned.push(self.entries.remove(index).entry_id);
        }
        pruned.reverse();
        pruned
    }

    /// Lifetime bucket view: entries of one landmark kind, newest first.
    pub fn bucket(&self, kind: EntryKind) -> Vec<&MemoryEntry> {
        let mut bucket: Vec<&MemoryEntry> =
            self.entries.iter().filter(|e| e.kind == kind).collect();
        bucket.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        bucket
    }

    /// Count of resident entries per kind.
    pub fn kind_counts(&self) -> Vec<(EntryKind, usize)> {
        let mut counts: Vec<(EntryKind, usize)> = Vec::new();
        for entry in &self.entries {
            match counts.iter_mut().find(|(k, _)| *k == entry.kind) {
                Some((_, n)) => *n += 1,
                None => counts.push((entry.kind, 1)),
            }
        }
        counts
    }

    /// The most recent Summary entry, if any.
    pub fn latest_summary(&self) -> Option<&MemoryEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.kind == EntryKind::Summary)
    }
}

// ============================================================================
// TESTS
// ============================================================================
