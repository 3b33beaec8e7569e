//! # Memory Engine
//!
//! The single owner of all mutable memory state: hierarchy, relationship
//! vector, session tracker, checkpoint index and projector. The
//! orchestrator confines this to one task and feeds it typed commands;
//! nothing else ever mutates these structures.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::affect::{Affect, AffectAnalyzer};
use crate::checkpoint::{
    CHECKPOINT_SCHEMA_VERSION, CheckpointManager, CheckpointState, CheckpointTrigger,
};
use crate::config::Config;
use crate::equation::{EquationContext, EventKind, LivingEquation, RelationshipState};
use crate::error::Result;
use crate::hierarchy::{EntryKind, MemoryScale, TemporalHierarchy};
use crate::message::Message;
use crate::projector::{ProjectorContext, StateProjector};
use crate::scoring::ImportanceScorer;
use crate::session::SessionTracker;
use crate::statedir::StateDir;

// ============================================================================
// REPORTS
// ============================================================================

/// What one ingested message did to the engine.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub admitted: bool,
    pub separator_injected: bool,
    pub landmarks: Vec<EntryKind>,
    pub checkpoint: Option<CheckpointTrigger>,
}

/// Periodic health snapshot, logged and available to the CLI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub messages_admitted: u64,
    pub entries_immediate: usize,
    pub entries_short_term: usize,
    pub entries_long_term: usize,
    pub entries_lifetime: usize,
    pub checkpoints_retained: usize,
    pub messages_since_checkpoint: u64,
    pub active_session: Option<String>,
    pub mood_valence: f64,
    pub mood_arousal: f64,
}

// ============================================================================
// ENGINE
// ============================================================================

/// All mutable engine state, confined to the memory task.
pub struct MemoryEngine {
    config: Config,
    state: StateDir,
    hierarchy: TemporalHierarchy,
    relationship: RelationshipState,
    session: SessionTracker,
    equation: LivingEquation,
    scorer: ImportanceScorer,
    analyzer: AffectAnalyzer,
    checkpoints: CheckpointManager,
    projector: StateProjector,
    last_message: Option<Message>,
    last_affect: Option<Affect>,
    last_event_at: Option<DateTime<Utc>>,
    messages_admitted: u64,
    last_projector_hash: String,
    work_context: serde_json::Value,
    /// Backfill mode: separators suppressed, checkpoints and projection
    /// deferred until the final flush.
    backfill: bool,
}

impl MemoryEngine {
    /// Build the engine over a locked state directory, restoring the
    /// newest checkpoint when one exists, then replaying the scale-log
    /// tails for anything admitted after it.
    pub fn open(config: Config, state: StateDir, analyzer: AffectAnalyzer) -> Result<Self> {
        let mut checkpoints =
            CheckpointManager::open(config.checkpoint.clone(), state.checkpoints_dir())?;

        let mut hierarchy = TemporalHierarchy::new(&config.scales);
        let mut relationship = RelationshipState::default();
        let mut session = SessionTracker::new();
        let mut messages_admitted = 0;

        match checkpoints.restore_latest()? {
            Some(restored) => {
                info!(
                    created_at = %restored.created_at,
                    trigger = %restored.trigger,
                    "restored state from checkpoint"
                );
                hierarchy = restored.scales;
                relationship = restored.relationship;
                session = restored.session;
                messages_admitted = restored.messages_admitted;
            }
            None => info!("no checkpoint found, starting fresh"),
        }

        // The scale logs outlive the checkpoint cadence: a message
        // admitted (and its offset committed) between checkpoints exists
        // only here after a crash. Replay the tails so the multiset of
        // admitted messages survives restarts intact.
        let mut recovered = 0usize;
        for scale in MemoryScale::ALL {
            for entry in state.read_scale_log(scale)? {
                let is_raw = entry.kind == EntryKind::RawMessage;
                if hierarchy.restore_entry(scale, entry) {
                    recovered += 1;
                    if is_raw {
                        messages_admitted += 1;
                        // These count toward the next message-interval
                        // checkpoint; they are not yet snapshotted.
                        checkpoints.note_message();
                    }
                }
            }
        }
        if recovered > 0 {
            info!(recovered, "replayed scale-log entries from past the last checkpoint");
        }

        Ok(Self {
            equation: LivingEquation::new(config.living_equation.clone()),
            scorer: ImportanceScorer::new(config.scoring.clone()),
            projector: StateProjector::new(),
            config,
            state,
            hierarchy,
            relationship,
            session,
            analyzer,
            checkpoints,
            last_message: None,
            last_affect: None,
            last_event_at: None,
            messages_admitted,
            last_projector_hash: String::new(),
            work_context: serde_json::json!({}),
            backfill: false,
        })
    }

    pub fn relationship(&self) -> &RelationshipState {
        &self.relationship
    }

    pub fn hierarchy(&self) -> &TemporalHierarchy {
        &self.hierarchy
    }

    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    pub fn state_dir(&self) -> &StateDir {
        &self.state
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn messages_admitted(&self) -> u64 {
        self.messages_admitted
    }

    /// Enter or leave backfill mode.
    pub fn set_backfill(&mut self, backfill: bool) {
        self.backfill = backfill;
        self.session.set_suppress_separators(backfill);
    }

    /// Replace the opaque external work context echoed by the projector.
    pub fn set_work_context(&mut self, value: serde_json::Value) {
        self.work_context = value;
    }

    // ========================================================================
    // INGEST
    // ========================================================================

    /// Ingest one message.
    pub fn ingest(&mut self, message: Message) -> Result<IngestReport> {
        let mut reports = self.ingest_batch(vec![message])?;
        Ok(reports.pop().unwrap_or_default())
    }

    /// Ingest an ordered batch: session tracking, affect analysis (one
    /// scoring pass over the whole batch), relationship evolution,
    /// admission, checkpoint triggers, and one projection at the end.
    pub fn ingest_batch(&mut self, messages: Vec<Message>) -> Result<Vec<IngestReport>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        // Weave separators in where the session tracker demands them.
        let mut woven: Vec<(Message, bool)> = Vec::with_capacity(messages.len());
        for message in messages {
            if let Some(separator) = self.session.observe(&message.session_id, message.timestamp) {
                woven.push((separator, true));
            }
            woven.push((message, false));
        }

        let refs: Vec<&Message> = woven.iter().map(|(m, _)| m).collect();
        let affects = self.analyzer.analyze_batch(&refs);

        let mut reports = Vec::with_capacity(woven.len());
        let mut changed = false;
        for ((message, injected), affect) in woven.into_iter().zip(affects) {
            let report = self.ingest_one(message, affect, injected)?;
            changed |= report.admitted;
            reports.push(report);
        }

        if changed && !self.backfill {
            self.project(Utc::now())?;
        }
        Ok(reports)
    }

    fn ingest_one(
        &mut self,
        message: Message,
        affect: Affect,
        separator_injected: bool,
    ) -> Result<IngestReport> {
        let now = message.timestamp;
        let is_separator = message.is_separator();

        // Continuous evolution over the silent gap, context held from the
        // previous affect.
        let before = self.relationship;
        if let Some(last_at) = self.last_event_at {
            let elapsed = (now - last_at).num_milliseconds() as f64 / 1000.0;
            if elapsed > 0.0 {
                let context = self
                    .last_affect
                    .as_ref()
                    .and_then(EquationContext::from_affect);
                match self.equation.evolve(self.relationship, elapsed, context.as_ref()) {
                    Ok(next) => self.relationship = next,
                    Err(e) => {
                        // Rollback semantics: keep the last stable state.
                        warn!(error = %e, "living equation diverged, keeping last stable state");
                    }
                }
            }
        }
        self.last_event_at = Some(now);

        // Admit first so landmark detection can drive the discrete event.
        let relationship_probe = self.relationship.distance(&before);
        let outcome = self.hierarchy.admit(
            &message,
            (!is_separator).then(|| affect.clone()),
            relationship_probe,
            &self.config.landmarks,
        );

        let mut report = IngestReport {
            admitted: outcome.admitted,
            separator_injected,
            landmarks: outcome.landmarks.clone(),
            checkpoint: None,
        };

        if !outcome.admitted {
            return Ok(report);
        }

        // Discrete event application; the entry's captured shift then
        // covers both the continuous drift and the event delta.
        if let Some(kind) = classify_event(&message, &affect, &outcome.landmarks) {
            self.relationship = self
                .equation
                .apply_event(self.relationship, kind, affect.intensity.max(0.3));
            self.hierarchy
                .set_relationship_delta(&outcome.entry_id, self.relationship.distance(&before));
        }

        // Persist the raw entry, and any landmark copies, to their scale
        // logs. The logs are the durable record between checkpoints
        // (compacted at each one), so restore can replay this tail.
        if let Some(entry) = self
            .hierarchy
            .scale(MemoryScale::Immediate)
            .entries()
            .iter()
            .rev()
            .find(|e| e.entry_id == outcome.entry_id)
        {
            self.state
                .append_scale_entry(MemoryScale::Immediate, &serde_json::to_string(entry)?)?;
        }
        for kind in &outcome.landmarks {
            let copy_id = format!("{}-{}", kind.as_str(), outcome.entry_id);
            if let Some(copy) = self
                .hierarchy
                .scale(MemoryScale::Lifetime)
                .entries()
                .iter()
                .rev()
                .find(|e| e.entry_id == copy_id)
            {
                self.state
                    .append_scale_entry(MemoryScale::Lifetime, &serde_json::to_string(copy)?)?;
            }
        }

        self.messages_admitted += 1;
        if !is_separator {
            self.last_message = Some(message);
            self.last_affect = Some(affect.clone());
        }

        // Event-driven checkpoint triggers.
        self.checkpoints.note_message();
        if !self.backfill {
            if self.checkpoints.emotion_due(affect.intensity) {
                self.checkpoint(CheckpointTrigger::EmotionalPeak)?;
                report.checkpoint = Some(CheckpointTrigger::EmotionalPeak);
            } else if outcome.landmarks.contains(&EntryKind::Accomplishment) {
                self.checkpoint(CheckpointTrigger::Accomplishment)?;
                report.checkpoint = Some(CheckpointTrigger::Accomplishment);
            }
        }

        Ok(report)
    }

    // ========================================================================
    // PERIODIC WORK
    // ========================================================================

    /// Run a consolidation pass and reproject.
    pub fn consolidate(&mut self, now: DateTime<Utc>) -> Result<()> {
        let report = self
            .hierarchy
            .consolidate(now, &self.scorer, Some(self.analyzer.backend()));
        if report.migrated + report.summarized + report.pruned > 0 && !self.backfill {
            self.project(now)?;
        }
        Ok(())
    }

    /// Cheap checkpoint poll; writes one when a trigger is due.
    pub fn poll_checkpoint(&mut self, now: DateTime<Utc>) -> Result<Option<String>> {
        if self.backfill {
            return Ok(None);
        }
        match self.checkpoints.poll_due(now) {
            Some(trigger) => Ok(Some(self.checkpoint(trigger)?)),
            None => Ok(None),
        }
    }

    /// Write a checkpoint now, under the given trigger.
    pub fn checkpoint(&mut self, trigger: CheckpointTrigger) -> Result<String> {
        let snapshot = CheckpointState {
            version: CHECKPOINT_SCHEMA_VERSION,
            created_at: Utc::now(),
            trigger,
            relationship: self.relationship,
            scales: self.hierarchy.clone(),
            session: self.session.clone(),
            projector_hash: self.last_projector_hash.clone(),
            messages_admitted: self.messages_admitted,
        };
        let id = self.checkpoints.write(&snapshot)?;
        // Scale logs compact at each successful checkpoint.
        self.state.compact_scale_logs(&self.hierarchy)?;
        Ok(id)
    }

    /// Regenerate the briefing and realtime files.
    pub fn project(&mut self, now: DateTime<Utc>) -> Result<()> {
        // Surfacing a landmark in the briefing is a retrieval.
        self.hierarchy
            .touch_recalled_landmarks(self.config.max_conversation_seeds, now);
        let forecast = match self.equation.predict_stability(self.relationship, 12) {
            Ok(forecast) => Some(forecast),
            Err(e) => {
                warn!(error = %e, "stability forecast diverged, omitting from briefing");
                None
            }
        };
        let ctx = ProjectorContext {
            identity: &self.config.identity,
            hierarchy: &self.hierarchy,
            relationship: &self.relationship,
            forecast: forecast.as_ref(),
            session: &self.session,
            last_message: self.last_message.as_ref(),
            last_affect: self.last_affect.as_ref(),
            mood: self.analyzer.mood().mood(),
            messages_admitted: self.messages_admitted,
            max_seeds: self.config.max_conversation_seeds,
            work_context: Some(&self.work_context),
        };
        self.last_projector_hash = self.projector.project(&self.state, &ctx, now)?;
        Ok(())
    }

    /// Final flush on shutdown: drain-side callers have stopped feeding;
    /// write the Shutdown checkpoint and the last projection.
    pub fn shutdown(&mut self) -> Result<()> {
        self.project(Utc::now())?;
        self.checkpoint(CheckpointTrigger::Shutdown)?;
        info!("engine shut down cleanly");
        Ok(())
    }

    pub fn health(&self) -> HealthSnapshot {
        let (mood_valence, mood_arousal) = self.analyzer.mood().mood();
        HealthSnapshot {
            messages_admitted: self.messages_admitted,
            entries_immediate: self.hierarchy.scale(MemoryScale::Immediate).len(),
            entries_short_term: self.hierarchy.scale(MemoryScale::ShortTerm).len(),
            entries_long_term: self.hierarchy.scale(MemoryScale::LongTerm).len(),
            entries_lifetime: self.hierarchy.scale(MemoryScale::Lifetime).len(),
            checkpoints_retained: self.checkpoints.index().len(),
            messages_since_checkpoint: self.checkpoints.messages_since_checkpoint(),
            active_session: self.session.active_session().map(str::to_string),
            mood_valence,
            mood_arousal,
        }
    }

}

/// Map a message's affect and landmarks onto the discrete event table.
fn classify_event(message: &Message, affect: &Affect, landmarks: &[EntryKind]) -> Option<EventKind> {
    if message.is_separator() {
        return Some(EventKind::Separation);
    }
    if landmarks.contains(&EntryKind::Accomplishment) {
        return Some(EventKind::CollaborativeWork);
    }
    if landmarks.contains(&EntryKind::Regret) {
        return Some(EventKind::Support);
    }
    if affect.pad.pleasure > 0.5 {
        return Some(EventKind::PositiveInteraction);
    }
    if affect.pad.pleasure < -0.5 && affect.pad.arousal > 0.3 {
        return Some(EventKind::Conflict);
    }
    None
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn engine(dir: &Path) -> MemoryEngine {
        let state = StateDir::open(dir.join("state")).unwrap();
        MemoryEngine::open(Config::default(), state, AffectAnalyzer::rules()).unwrap()
    }

    fn message(session: &str, content: &str, seq: u64) -> Message {
        let line = format!(r#"{{"role":"user","content":"{content}"}}"#);
        Message::parse_line(
            session,
            seq,
            &line,
            Utc::now(),
            Path::new(session),
            (seq, seq + line.len() as u64),
        )
        .unwrap()
    }

    #[test]
    fn test_ingest_admits_and_projects() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        let report = e.ingest(message("a.log", "hello there", 0)).unwrap();
        assert!(report.admitted);
        assert_eq!(e.messages_admitted(), 1);
        assert!(e.state_dir().briefing_path().exists());
    }

    #[test]
    fn test_duplicate_ingest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        e.ingest(message("a.log", "hello", 0)).unwrap();
        let report = e.ingest(message("a.log", "hello", 0)).unwrap();
        assert!(!report.admitted);
        assert_eq!(e.messages_admitted(), 1);
        assert_eq!(e.hierarchy().scale(MemoryScale::Immediate).len(), 1);
    }

    #[test]
    fn test_session_switch_injects_separator() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        e.ingest(message("a.log", "from a", 0)).unwrap();
        let report = e.ingest(message("b.log", "from b", 0)).unwrap();
        assert_eq!(e.session().active_session(), Some("b.log"));
        // The separator was admitted alongside the message itself.
        assert_eq!(e.hierarchy().scale(MemoryScale::Immediate).len(), 3);
        let _ = report;
    }

    #[test]
    fn test_positive_run_raises_connection() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        let start = e.relationship().connection;
        for (i, text) in [
            "hello friend",
            "I love working on this with you",
            "this is wonderful, I am so happy",
        ]
        .iter()
        .enumerate()
        {
            e.ingest(message("a.log", text, i as u64)).unwrap();
        }
        assert!(
            e.relationship().connection > start,
            "connection should strictly increase over a warm exchange"
        );
    }

    #[test]
    fn test_accomplishment_triggers_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        let report = e
            .ingest(message(
                "a.log",
                "we finally fixed it, I am so happy and proud",
                0,
            ))
            .unwrap();
        assert!(report.landmarks.contains(&EntryKind::Accomplishment));
        assert_eq!(report.checkpoint, Some(CheckpointTrigger::Accomplishment));
        assert_eq!(e.checkpoints().index().len(), 1);
    }

    #[test]
    fn test_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut e = engine(dir.path());
            e.ingest(message("a.log", "I am so proud we shipped this", 0))
                .unwrap();
            e.checkpoint(CheckpointTrigger::Manual).unwrap();
        }
        let e = engine(dir.path());
        assert_eq!(e.messages_admitted(), 1);
        assert!(e.hierarchy().has_seen(&message("a.log", "I am so proud we shipped this", 0).message_id));
        assert_eq!(e.session().active_session(), Some("a.log"));
    }

    #[test]
    fn test_unsnapshotted_admissions_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut e = engine(dir.path());
            e.ingest(message("a.log", "hello there", 0)).unwrap();
            e.ingest(message("a.log", "second note", 1)).unwrap();
            // No checkpoint: the drop here is the crash.
        }
        let mut e = engine(dir.path());
        assert_eq!(e.messages_admitted(), 2);
        assert_eq!(e.hierarchy().scale(MemoryScale::Immediate).len(), 2);

        // Replayed dedup state still refuses a duplicate delivery.
        let report = e.ingest(message("a.log", "hello there", 0)).unwrap();
        assert!(!report.admitted);
        assert_eq!(e.messages_admitted(), 2);
    }

    #[test]
    fn test_recovered_messages_count_toward_message_interval() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut e = engine(dir.path());
            for i in 0..30 {
                e.ingest(message("a.log", &format!("lost note {i}"), i)).unwrap();
            }
        }
        let mut e = engine(dir.path());
        for i in 30..50 {
            e.ingest(message("a.log", &format!("fresh note {i}"), i)).unwrap();
        }
        // 30 recovered + 20 fresh reach the 50-message trigger.
        assert!(e.poll_checkpoint(Utc::now()).unwrap().is_some());
    }

    #[test]
    fn test_backfill_defers_checkpoints_and_separators() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        e.set_backfill(true);
        e.ingest(message("a.log", "we fixed it, so happy and proud", 0))
            .unwrap();
        e.ingest(message("b.log", "another session entirely", 0)).unwrap();
        assert_eq!(e.checkpoints().index().len(), 0);
        // No separator: two messages, two entries.
        assert_eq!(e.hierarchy().scale(MemoryScale::Immediate).len(), 2);
        e.set_backfill(false);
    }

    #[test]
    fn test_poll_checkpoint_message_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        for i in 0..50 {
            e.ingest(message("a.log", &format!("note {i}"), i)).unwrap();
        }
        let id = e.poll_checkpoint(Utc::now()).unwrap();
        assert!(id.is_some());
        assert!(e.poll_checkpoint(Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_work_context_echoed_to_realtime_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        e.set_work_context(serde_json::json!({ "task": "migrating the archive" }));
        e.ingest(message("a.log", "hello", 0)).unwrap();

        let raw = std::fs::read_to_string(
            e.state_dir().realtime_path("work_context.json"),
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["fields"]["task"], "migrating the archive");
    }

    #[test]
    fn test_health_snapshot_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut e = engine(dir.path());
        e.ingest(message("a.log", "hello", 0)).unwrap();
        let health = e.health();
        assert_eq!(health.messages_admitted, 1);
        assert_eq!(health.entries_immediate, 1);
        assert_eq!(health.active_session, Some("a.log".to_string()));
    }
}
