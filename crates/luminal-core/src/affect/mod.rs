//! # Affect Module
//!
//! Dimensional + categorical emotional assessment of messages.
//!
//! The dimensional side is PAD (Mehrabian & Russell, 1974): pleasure,
//! arousal and dominance, each in [-1, 1]. The categorical side is a
//! frozen vocabulary built from the union of three models that kept
//! showing up in the conversation corpus this engine grew out of:
//! Plutchik's eight primaries, the Plutchik dyads, and the Geneva wheel
//! families. Unknown backend tags map to [`Emotion::Other`] with the raw
//! string preserved, so the vocabulary stays closed.

mod analyzer;
mod rules;

pub use analyzer::{AffectAnalyzer, MoodWindow, coalesce_speaker_windows};
pub use rules::{RulesBackend, extractive_summary};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Speaker;

// ============================================================================
// PAD VECTOR
// ============================================================================

/// Pleasure / arousal / dominance, each clamped to [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pad {
    pub pleasure: f64,
    pub arousal: f64,
    pub dominance: f64,
}

impl Pad {
    pub fn new(pleasure: f64, arousal: f64, dominance: f64) -> Self {
        Self {
            pleasure,
            arousal,
            dominance,
        }
        .clamped()
    }

    /// Clamp all components into the model's domain. NaN collapses to 0.
    pub fn clamped(self) -> Self {
        fn clamp(v: f64) -> f64 {
            if v.is_nan() { 0.0 } else { v.clamp(-1.0, 1.0) }
        }
        Self {
            pleasure: clamp(self.pleasure),
            arousal: clamp(self.arousal),
            dominance: clamp(self.dominance),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.pleasure.is_finite() && self.arousal.is_finite() && self.dominance.is_finite()
    }

    /// Vector magnitude normalized to [0, 1].
    pub fn intensity(&self) -> f64 {
        let norm = (self.pleasure.powi(2) + self.arousal.powi(2) + self.dominance.powi(2)).sqrt();
        (norm / 3.0_f64.sqrt()).min(1.0)
    }

    /// Euclidean distance to another PAD point.
    pub fn distance(&self, other: &Pad) -> f64 {
        ((self.pleasure - other.pleasure).powi(2)
            + (self.arousal - other.arousal).powi(2)
            + (self.dominance - other.dominance).powi(2))
        .sqrt()
    }

    pub fn mean(points: &[Pad]) -> Pad {
        if points.is_empty() {
            return Pad::default();
        }
        let n = points.len() as f64;
        Pad {
            pleasure: points.iter().map(|p| p.pleasure).sum::<f64>() / n,
            arousal: points.iter().map(|p| p.arousal).sum::<f64>() / n,
            dominance: points.iter().map(|p| p.dominance).sum::<f64>() / n,
        }
    }
}

// ============================================================================
// EMOTION VOCABULARY
// ============================================================================

/// The closed emotion vocabulary (33 tags).
///
/// Eight Plutchik primaries, sixteen dyads, four wheel additions,
/// three bookkeeping tags. Frozen: backends returning anything else get
/// [`Emotion::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    // Plutchik primaries
    Joy,
    Trust,
    Fear,
    Surprise,
    Sadness,
    Disgust,
    Anger,
    Anticipation,
    // Primary dyads
    Love,
    Submission,
    Awe,
    Disapproval,
    Remorse,
    Contempt,
    Aggressiveness,
    Optimism,
    // Secondary dyads
    Guilt,
    Despair,
    Envy,
    Pride,
    Delight,
    Sentimentality,
    Shame,
    Outrage,
    Pessimism,
    Morbidness,
    Dominance,
    Anxiety,
    // Wheel additions
    Curiosity,
    Hope,
    Gratitude,
    // Bookkeeping
    #[default]
    Neutral,
    Other,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Joy => "joy",
            Emotion::Trust => "trust",
            Emotion::Fear => "fear",
            Emotion::Surprise => "surprise",
            Emotion::Sadness => "sadness",
            Emotion::Disgust => "disgust",
            Emotion::Anger => "anger",
            Emotion::Anticipation => "anticipation",
            Emotion::Love => "love",
            Emotion::Submission => "submission",
            Emotion::Awe => "awe",
            Emotion::Disapproval => "disapproval",
            Emotion::Remorse => "remorse",
            Emotion::Contempt => "contempt",
            Emotion::Aggressiveness => "aggressiveness",
            Emotion::Optimism => "optimism",
            Emotion::Guilt => "guilt",
            Emotion::Despair => "despair",
            Emotion::Envy => "envy",
            Emotion::Pride => "pride",
            Emotion::Delight => "delight",
            Emotion::Sentimentality => "sentimentality",
            Emotion::Shame => "shame",
            Emotion::Outrage => "outrage",
            Emotion::Pessimism => "pessimism",
            Emotion::Morbidness => "morbidness",
            Emotion::Dominance => "dominance",
            Emotion::Anxiety => "anxiety",
            Emotion::Curiosity => "curiosity",
            Emotion::Hope => "hope",
            Emotion::Gratitude => "gratitude",
            Emotion::Neutral => "neutral",
            Emotion::Other => "other",
        }
    }

    /// Parse a backend tag. Unknown strings return `None`; the caller maps
    /// those to [`Emotion::Other`] and preserves the raw tag.
    pub fn parse_name(s: &str) -> Option<Self> {
        ALL_EMOTIONS
            .iter()
            .find(|e| e.as_str() == s.to_lowercase())
            .copied()
    }

    /// The PAD anchor point for this tag.
    ///
    /// Research-derived anchors; the closest-anchor inverse mapping uses
    /// these same points, so `pad_to_emotion(e.pad_anchor()) == e` for
    /// every tag with a distinct anchor.
    pub fn pad_anchor(&self) -> Pad {
        let (p, a, d) = match self {
            Emotion::Joy => (0.85, 0.45, 0.5),
            Emotion::Trust => (0.6, -0.1, 0.35),
            Emotion::Fear => (-0.7, 0.6, -0.6),
            Emotion::Surprise => (0.2, 0.8, -0.15),
            Emotion::Sadness => (-0.6, -0.4, -0.4),
            Emotion::Disgust => (-0.6, 0.2, 0.25),
            Emotion::Anger => (-0.8, 0.8, 0.7),
            Emotion::Anticipation => (0.3, 0.5, 0.3),
            Emotion::Love => (0.9, 0.3, 0.2),
            Emotion::Submission => (0.1, -0.2, -0.7),
            Emotion::Awe => (0.4, 0.7, -0.45),
            Emotion::Disapproval => (-0.4, 0.1, 0.4),
            Emotion::Remorse => (-0.5, -0.2, -0.5),
            Emotion::Contempt => (-0.55, 0.3, 0.6),
            Emotion::Aggressiveness => (-0.45, 0.75, 0.8),
            Emotion::Optimism => (0.65, 0.35, 0.55),
            Emotion::Guilt => (-0.45, 0.25, -0.55),
            Emotion::Despair => (-0.85, -0.3, -0.7),
            Emotion::Envy => (-0.5, 0.4, -0.2),
            Emotion::Pride => (0.7, 0.5, 0.75),
            Emotion::Delight => (0.8, 0.65, 0.4),
            Emotion::Sentimentality => (0.45, -0.3, -0.1),
            Emotion::Shame => (-0.6, 0.3, -0.65),
            Emotion::Outrage => (-0.7, 0.85, 0.45),
            Emotion::Pessimism => (-0.4, -0.35, -0.25),
            Emotion::Morbidness => (-0.3, 0.15, 0.1),
            Emotion::Dominance => (0.25, 0.4, 0.9),
            Emotion::Anxiety => (-0.5, 0.7, -0.3),
            Emotion::Curiosity => (0.5, 0.55, 0.15),
            Emotion::Hope => (0.6, 0.25, 0.2),
            Emotion::Gratitude => (0.75, 0.2, 0.1),
            Emotion::Neutral => (0.0, 0.0, 0.0),
            Emotion::Other => (0.0, 0.05, 0.0),
        };
        Pad {
            pleasure: p,
            arousal: a,
            dominance: d,
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Every tag in the closed vocabulary, in declaration order.
pub const ALL_EMOTIONS: [Emotion; 33] = [
    Emotion::Joy,
    Emotion::Trust,
    Emotion::Fear,
    Emotion::Surprise,
    Emotion::Sadness,
    Emotion::Disgust,
    Emotion::Anger,
    Emotion::Anticipation,
    Emotion::Love,
    Emotion::Submission,
    Emotion::Awe,
    Emotion::Disapproval,
    Emotion::Remorse,
    Emotion::Contempt,
    Emotion::Aggressiveness,
    Emotion::Optimism,
    Emotion::Guilt,
    Emotion::Despair,
    Emotion::Envy,
    Emotion::Pride,
    Emotion::Delight,
    Emotion::Sentimentality,
    Emotion::Shame,
    Emotion::Outrage,
    Emotion::Pessimism,
    Emotion::Morbidness,
    Emotion::Dominance,
    Emotion::Anxiety,
    Emotion::Curiosity,
    Emotion::Hope,
    Emotion::Gratitude,
    Emotion::Neutral,
    Emotion::Other,
];

/// Map a PAD point back to the closest anchored tag.
///
/// Bookkeeping tags are excluded: a near-origin point resolves to
/// `Neutral` by distance, never to `Other`.
pub fn pad_to_emotion(pad: &Pad) -> Emotion {
    let mut best = Emotion::Neutral;
    let mut best_distance = f64::INFINITY;
    for emotion in ALL_EMOTIONS {
        if emotion == Emotion::Other {
            continue;
        }
        let distance = pad.distance(&emotion.pad_anchor());
        if distance < best_distance {
            best_distance = distance;
            best = emotion;
        }
    }
    best
}

// ============================================================================
// AFFECT RECORDS
// ============================================================================

/// A backend's raw assessment of one text. The analyzer post-processes
/// this into a full [`Affect`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAffect {
    pub pad: Pad,
    /// Free-form tag; mapped onto the closed vocabulary downstream.
    pub primary_tag: String,
    pub confidence: f64,
}

/// Per-speaker slice of an affect assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerAffect {
    pub pad: Pad,
    pub primary_emotion: Emotion,
    pub intensity: f64,
}

/// The structured emotional assessment of a message (or speaker window).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Affect {
    pub pad: Pad,
    pub primary_emotion: Emotion,
    /// Up to three secondary tags; an unknown backend tag lands here raw.
    pub secondary: Vec<String>,
    /// `min(1, |pad| / sqrt(3))`.
    pub intensity: f64,
    /// Speaker -> assessment, keyed by speaker name for stable serialization.
    pub per_speaker: BTreeMap<String, SpeakerAffect>,
    pub confidence: f64,
}

impl Default for Affect {
    fn default() -> Self {
        Self {
            pad: Pad::default(),
            primary_emotion: Emotion::Neutral,
            secondary: Vec::new(),
            intensity: 0.0,
            per_speaker: BTreeMap::new(),
            confidence: 0.0,
        }
    }
}

impl Affect {
    /// Look up the assessment for one speaker, if it was decomposed.
    pub fn for_speaker(&self, speaker: Speaker) -> Option<&SpeakerAffect> {
        self.per_speaker.get(speaker.as_str())
    }
}

// ============================================================================
// BACKEND CONTRACT
// ============================================================================

/// The injectable scoring capability.
///
/// Implementations must be deterministic for the same input and model
/// version, and must return exactly one [`RawAffect`] per input text,
/// preserving order. Latency is unbounded; callers enforce timeouts.
pub trait AffectBackend: Send + Sync {
    /// Identifier recorded alongside results (model + version).
    fn model_id(&self) -> &str;

    /// Score a batch of texts, one result per input, order preserved.
    fn score(&self, texts: &[&str]) -> Result<Vec<RawAffect>>;

    /// Produce a short abstractive summary of the given texts.
    fn summarize(&self, texts: &[&str]) -> Result<String>;
}

// ============================================================================
// TESTS
// ============================================================================
