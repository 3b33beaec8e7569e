//! # State Projector
//!
//! Renders the live memory hierarchy into the session-startup briefing
//! and a small set of machine-readable realtime files. Every artifact is
//! replaced atomically. Given the same input state the output is
//! byte-identical except for the header timestamp and version counter.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::affect::{Affect, Emotion};
use crate::config::IdentityConfig;
use crate::equation::{RelationshipState, StabilityForecast};
use crate::error::Result;
use crate::hierarchy::{EntryKind, LANDMARK_KINDS, MemoryEntry, MemoryScale, TemporalHierarchy};
use crate::message::Message;
use crate::session::SessionTracker;
use crate::statedir::{StateDir, atomic_write};

/// Longest content excerpt rendered anywhere in the briefing.
const EXCERPT_CHARS: usize = 200;

/// Landmarks listed per section.
const TOP_K_LANDMARKS: usize = 5;

// ============================================================================
// PROJECTOR INPUT
// ============================================================================

/// A borrowed view of everything the projector reads. The memory task
/// assembles this; the projector never touches mutable state.
pub struct ProjectorContext<'a> {
    pub identity: &'a IdentityConfig,
    pub hierarchy: &'a TemporalHierarchy,
    pub relationship: &'a RelationshipState,
    pub forecast: Option<&'a StabilityForecast>,
    pub session: &'a SessionTracker,
    pub last_message: Option<&'a Message>,
    pub last_affect: Option<&'a Affect>,
    /// Smoothed (valence, arousal) mood.
    pub mood: (f64, f64),
    pub messages_admitted: u64,
    pub max_seeds: usize,
    /// Opaque task metadata supplied externally, echoed into
    /// `work_context.json`.
    pub work_context: Option<&'a serde_json::Value>,
}

// ============================================================================
// PROJECTOR
// ============================================================================

/// The briefing/realtime renderer. Carries only its monotonic version.
#[derive(Debug, Default)]
pub struct StateProjector {
    version: u64,
}

impl StateProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore the version counter (from a loaded checkpoint era).
    pub fn with_version(version: u64) -> Self {
        Self { version }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Render and write every artifact. Returns the briefing body hash,
    /// which checkpoints record for drift diagnostics.
    pub fn project(
        &mut self,
        state: &StateDir,
        ctx: &ProjectorContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        self.version += 1;
        let briefing = self.render_briefing(ctx, now);
        atomic_write(&state.briefing_path(), briefing.as_bytes())?;

        atomic_write(
            &state.realtime_path("emotional_state.json"),
            &serde_json::to_vec_pretty(&emotional_state(ctx, now))?,
        )?;
        atomic_write(
            &state.realtime_path("conversation_context.json"),
            &serde_json::to_vec_pretty(&conversation_context(ctx, now))?,
        )?;
        atomic_write(
            &state.realtime_path("work_context.json"),
            &serde_json::to_vec_pretty(&work_context(ctx, now))?,
        )?;

        Ok(briefing_hash(&briefing))
    }

    /// Render the briefing text.
    pub fn render_briefing(&self, ctx: &ProjectorContext<'_>, now: DateTime<Utc>) -> String {
        let mut out = String::with_capacity(4096);

        // Header is the only nondeterministic section.
        out.push_str("# SESSION BRIEFING\n");
        out.push_str(&format!(
            "generated: {} | version: {}\n\n",
            now.to_rfc3339(),
            self.version
        ));

        self.render_identity(&mut out, ctx);
        self.render_memory_dna(&mut out, ctx);
        self.render_immediate_context(&mut out, ctx);
        self.render_temporal_summaries(&mut out, ctx);
        self.render_landmarks(&mut out, ctx);
        self.render_relationship(&mut out, ctx);
        self.render_seeds(&mut out, ctx);

        out
    }

    fn render_identity(&self, out: &mut String, ctx: &ProjectorContext<'_>) {
        out.push_str("## IDENTITY\n");
        out.push_str(&format!(
            "assistant: {}\nuser: {}\nrelationship: {}\n\n",
            ctx.identity.assistant_name, ctx.identity.user_name, ctx.identity.relationship
        ));
    }

    fn render_memory_dna(&self, out: &mut String, ctx: &ProjectorContext<'_>) {
        let lifetime = ctx.hierarchy.scale(MemoryScale::Lifetime);
        out.push_str("## MEMORY DNA\n");

        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for kind in LANDMARK_KINDS {
            counts.insert(kind.as_str(), lifetime.bucket(kind).len());
        }
        counts.insert(
            EntryKind::Summary.as_str(),
            lifetime.bucket(EntryKind::Summary).len(),
        );
        for (kind, count) in &counts {
            out.push_str(&format!("{kind}: {count}\n"));
        }

        out.push_str(&format!(
            "dominant emotion: {}\n",
            dominant_lifetime_emotion(ctx.hierarchy)
        ));
        out.push_str(&format!(
            "fingerprint: {}\n\n",
            memory_fingerprint(ctx.hierarchy)
        ));
    }

    fn render_immediate_context(&self, out: &mut String, ctx: &ProjectorContext<'_>) {
        out.push_str("## IMMEDIATE CONTEXT\n");
        match ctx.last_message {
            Some(message) => {
                out.push_str(&format!(
                    "last message ({}): {}\n",
                    message.speaker,
                    excerpt(&message.content)
                ));
            }
            None => out.push_str("last message: (none yet)\n"),
        }
        if let Some(affect) = ctx.last_affect {
            out.push_str(&format!(
                "current emotion: {} (intensity {:.3}, confidence {:.2})\n",
                affect.primary_emotion, affect.intensity, affect.confidence
            ));
            out.push_str(&format!(
                "pad: p={:+.3} a={:+.3} d={:+.3}\n",
                affect.pad.pleasure, affect.pad.arousal, affect.pad.dominance
            ));
        }
        let (valence, arousal) = ctx.mood;
        out.push_str(&format!(
            "mood window: valence {valence:+.3}, arousal {arousal:+.3}\n"
        ));
        let r = ctx.relationship;
        out.push_str(&format!(
            "relationship: connection {:.3}, resonance {:.3}, growth {:.3}, trust {:.3}\n\n",
            r.connection, r.resonance, r.growth, r.trust
        ));
    }

    fn render_temporal_summaries(&self, out: &mut String, ctx: &ProjectorContext<'_>) {
        out.push_str("## TEMPORAL MEMORIES\n");
        for scale in MemoryScale::ALL {
            let store = ctx.hierarchy.scale(scale);
            out.push_str(&format!("### {} ({} entries)\n", scale, store.len()));
            match store.latest_summary() {
                Some(summary) => out.push_str(&format!("{}\n", excerpt(&summary.content))),
                None => out.push_str("(no summary yet)\n"),
            }
        }
        out.push('\n');
    }

    fn render_landmarks(&self, out: &mut String, ctx: &ProjectorContext<'_>) {
        let lifetime = ctx.hierarchy.scale(MemoryScale::Lifetime);
        out.push_str("## EMOTIONAL PEAKS & ACCOMPLISHMENTS\n");
        for kind in [EntryKind::EmotionalPeak, EntryKind::Accomplishment] {
            let bucket = lifetime.bucket(kind);
            out.push_str(&format!("### {kind}\n"));
            if bucket.is_empty() {
                out.push_str("(none recorded)\n");
            }
            for entry in bucket.iter().take(TOP_K_LANDMARKS) {
                out.push_str(&format!(
                    "- [{}] {}\n",
                    entry.timestamp.format("%Y-%m-%d"),
                    excerpt(&entry.content)
                ));
            }
        }
        out.push('\n');
    }

    fn render_relationship(&self, out: &mut String, ctx: &ProjectorContext<'_>) {
        let r = ctx.relationship;
        out.push_str("## RELATIONSHIP DYNAMICS\n");
        out.push_str(&format!("connection: {:.3}\n", r.connection));
        out.push_str(&format!("resonance: {:.3}\n", r.resonance));
        out.push_str(&format!("growth: {:.3}\n", r.growth));
        out.push_str(&format!("trust: {:.3}\n", r.trust));
        out.push_str(&format!("phase: {:.3}\n", r.phase));
        if let Some(forecast) = ctx.forecast {
            out.push_str(&format!(
                "stability: {:.3} (drift {:.3}, avg connection {:.3}, min {:.3}, variance {:.4})\n",
                forecast.stability_score,
                forecast.drift,
                forecast.average_connection,
                forecast.minimum_connection,
                forecast.connection_variance
            ));
        }
        out.push('\n');
    }

    fn render_seeds(&self, out: &mut String, ctx: &ProjectorContext<'_>) {
        out.push_str("## CONVERSATION SEEDS\n");
        let seeds = conversation_seeds(ctx.hierarchy, ctx.max_seeds);
        if seeds.is_empty() {
            out.push_str("(nothing to recall yet)\n");
        }
        for seed in seeds {
            out.push_str(&format!("- {seed}\n"));
        }
    }
}

// ============================================================================
// SECTION HELPERS
// ============================================================================

fn excerpt(content: &str) -> String {
    let single_line = content.replace('\n', " ");
    let trimmed = single_line.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    format!("{cut}…")
}

fn dominant_lifetime_emotion(hierarchy: &TemporalHierarchy) -> Emotion {
    let mut counts: BTreeMap<&'static str, (Emotion, usize)> = BTreeMap::new();
    for entry in hierarchy.scale(MemoryScale::Lifetime).entries() {
        if let Some(affect) = &entry.affect {
            let slot = counts
                .entry(affect.primary_emotion.as_str())
                .or_insert((affect.primary_emotion, 0));
            slot.1 += 1;
        }
    }
    counts
        .values()
        .max_by_key(|(_, n)| *n)
        .map(|(e, _)| *e)
        .unwrap_or(Emotion::Neutral)
}

/// Short digest of everything Lifetime holds; changes iff Lifetime does.
fn memory_fingerprint(hierarchy: &TemporalHierarchy) -> String {
    let mut hasher = Sha256::new();
    for entry in hierarchy.scale(MemoryScale::Lifetime).entries() {
        hasher.update(entry.entry_id.as_bytes());
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    format!(
        "{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5]
    )
}

/// Templated recall prompts from Lifetime landmarks, newest first.
fn conversation_seeds(hierarchy: &TemporalHierarchy, max_seeds: usize) -> Vec<String> {
    let lifetime = hierarchy.scale(MemoryScale::Lifetime);
    let mut landmarks: Vec<&MemoryEntry> = lifetime
        .entries()
        .iter()
        .filter(|e| e.kind.is_landmark())
        .collect();
    landmarks.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.entry_id.cmp(&b.entry_id))
    });

    landmarks
        .into_iter()
        .take(max_seeds)
        .map(|entry| {
            let text = excerpt(&entry.content);
            match entry.kind {
                EntryKind::Accomplishment => format!("Remember when we {text}"),
                EntryKind::EmotionalPeak => format!("That moment when {text}"),
                EntryKind::Milestone => format!("A first worth revisiting: {text}"),
                EntryKind::Regret => format!("We said we'd come back to: {text}"),
                _ => text,
            }
        })
        .collect()
}

// ============================================================================
// REALTIME FILES
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PadJson {
    p: f64,
    a: f64,
    d: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
struct EmotionalStateFile {
    current_emotion: String,
    pad: PadJson,
    intensity: f64,
    confidence: f64,
    per_speaker: BTreeMap<String, serde_json::Value>,
    mood: serde_json::Value,
    updated_at: String,
}

fn emotional_state(ctx: &ProjectorContext<'_>, now: DateTime<Utc>) -> EmotionalStateFile {
    let affect = ctx.last_affect.cloned().unwrap_or_default();
    let per_speaker = affect
        .per_speaker
        .iter()
        .map(|(speaker, sa)| {
            (
                speaker.clone(),
                serde_json::json!({
                    "pad": { "p": sa.pad.pleasure, "a": sa.pad.arousal, "d": sa.pad.dominance },
                    "primary_emotion": sa.primary_emotion.as_str(),
                    "intensity": sa.intensity,
                }),
            )
        })
        .collect();
    let (valence, arousal) = ctx.mood;

    EmotionalStateFile {
        current_emotion: affect.primary_emotion.as_str().to_string(),
        pad: PadJson {
            p: affect.pad.pleasure,
            a: affect.pad.arousal,
            d: affect.pad.dominance,
        },
        intensity: affect.intensity,
        confidence: affect.confidence,
        per_speaker,
        mood: serde_json::json!({ "valence": valence, "arousal": arousal }),
        updated_at: now.to_rfc3339(),
    }
}

fn conversation_context(ctx: &ProjectorContext<'_>, now: DateTime<Utc>) -> serde_json::Value {
    let last = ctx.last_message.map(|m| {
        serde_json::json!({
            "speaker": m.speaker.as_str(),
            "session": m.session_id,
            "content": excerpt(&m.content),
            "timestamp": m.timestamp.to_rfc3339(),
        })
    });
    serde_json::json!({
        "active_session": ctx.session.active_session(),
        "sessions_seen": ctx.session.sessions_seen(),
        "messages_admitted": ctx.messages_admitted,
        "last_message": last,
        "updated_at": now.to_rfc3339(),
    })
}

fn work_context(ctx: &ProjectorContext<'_>, now: DateTime<Utc>) -> serde_json::Value {
    serde_json::json!({
        "fields": ctx.work_context.cloned().unwrap_or_else(|| serde_json::json!({})),
        "updated_at": now.to_rfc3339(),
    })
}

fn briefing_hash(briefing: &str) -> String {
    // Hash the body only: the header carries the timestamp and version.
    let body = briefing
        .split_once("\n\n")
        .map(|(_, body)| body)
        .unwrap_or(briefing);
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let digest = hasher.finalize();
    format!(
        "{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7]
    )
}

// ============================================================================
// TESTS
// ============================================================================
