//! Affect post-processing
//!
//! The backend returns raw scores; everything that makes them safe and
//! useful happens here: domain clamping, NaN quarantine, vocabulary
//! mapping, intensity, per-speaker decomposition over coalesced speaker
//! windows, and the rules fallback that keeps the pipeline moving when a
//! model backend is down.

use std::collections::BTreeMap;

use tracing::warn;

use crate::affect::{
    Affect, AffectBackend, Emotion, Pad, RawAffect, RulesBackend, SpeakerAffect, pad_to_emotion,
};
use crate::message::{Message, Speaker};

/// Confidence ceiling applied when scoring fell back to rules.
const FALLBACK_MAX_CONFIDENCE: f64 = 0.3;

/// Mood history capacity (running average window).
const MOOD_CAPACITY: usize = 20;

// ============================================================================
// MOOD WINDOW
// ============================================================================

/// Running window over recent (valence, arousal) pairs.
///
/// Feeds the projector's emotional-state file with a smoothed mood rather
/// than the raw last message.
#[derive(Debug, Clone, Default)]
pub struct MoodWindow {
    history: Vec<(f64, f64)>,
}

impl MoodWindow {
    pub fn push(&mut self, valence: f64, arousal: f64) {
        self.history.push((valence, arousal));
        if self.history.len() > MOOD_CAPACITY {
            self.history.remove(0);
        }
    }

    /// Mean (valence, arousal) over the window; neutral when empty.
    pub fn mood(&self) -> (f64, f64) {
        if self.history.is_empty() {
            return (0.0, 0.0);
        }
        let n = self.history.len() as f64;
        let v = self.history.iter().map(|(v, _)| v).sum::<f64>() / n;
        let a = self.history.iter().map(|(_, a)| a).sum::<f64>() / n;
        (v, a)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

// ============================================================================
// SPEAKER WINDOWS
// ============================================================================

/// Coalesce adjacent same-speaker messages into scoring windows.
///
/// Separators never join a window; they split the run on both sides.
pub fn coalesce_speaker_windows<'a>(messages: &[&'a Message]) -> Vec<(Speaker, Vec<&'a Message>)> {
    let mut windows: Vec<(Speaker, Vec<&Message>)> = Vec::new();
    for message in messages {
        if message.is_separator() {
            continue;
        }
        match windows.last_mut() {
            Some((speaker, run)) if *speaker == message.speaker => run.push(message),
            _ => windows.push((message.speaker, vec![message])),
        }
    }
    windows
}

// ============================================================================
// ANALYZER
// ============================================================================

/// The affect analyzer: a scoring backend plus the post-processing the
/// core owns regardless of backend.
pub struct AffectAnalyzer {
    backend: Box<dyn AffectBackend>,
    fallback: RulesBackend,
    mood: MoodWindow,
}

impl AffectAnalyzer {
    pub fn new(backend: Box<dyn AffectBackend>) -> Self {
        Self {
            backend,
            fallback: RulesBackend::new(),
            mood: MoodWindow::default(),
        }
    }

    /// Analyzer backed directly by the rules scorer.
    pub fn rules() -> Self {
        Self::new(Box::new(RulesBackend::new()))
    }

    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    /// The scoring backend, shared with the compressor's `summarize`.
    pub fn backend(&self) -> &dyn AffectBackend {
        self.backend.as_ref()
    }

    pub fn mood(&self) -> &MoodWindow {
        &self.mood
    }

    /// Analyze one message.
    pub fn analyze(&mut self, message: &Message) -> Affect {
        self.analyze_batch(&[message]).pop().unwrap_or_default()
    }

    /// Analyze a batch, preserving order.
    ///
    /// Separators receive a default (neutral, zero-confidence) affect and
    /// are excluded from speaker windows and mood tracking.
    pub fn analyze_batch(&mut self, messages: &[&Message]) -> Vec<Affect> {
        let texts: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        let raw = self.score_with_fallback(&texts);

        // Score each coalesced speaker window once.
        let windows = coalesce_speaker_windows(messages);
        let window_texts: Vec<String> = windows
            .iter()
            .map(|(_, run)| {
                run.iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect();
        let window_refs: Vec<&str> = window_texts.iter().map(String::as_str).collect();
        let window_raw = self.score_with_fallback(&window_refs);

        let window_affects: Vec<(Speaker, SpeakerAffect)> = windows
            .iter()
            .zip(window_raw)
            .map(|((speaker, _), raw)| {
                let (pad, emotion, _, _) = normalize_raw(&raw);
                (
                    *speaker,
                    SpeakerAffect {
                        pad,
                        primary_emotion: emotion,
                        intensity: pad.intensity(),
                    },
                )
            })
            .collect();

        // Walk messages; each carries the latest window per speaker seen so
        // far, so per_speaker reads as "current state of each voice".
        let mut window_cursor = 0usize;
        let mut current: BTreeMap<String, SpeakerAffect> = BTreeMap::new();
        let mut results = Vec::with_capacity(messages.len());

        for (message, raw) in messages.iter().zip(raw) {
            if message.is_separator() {
                results.push(Affect::default());
                continue;
            }

            // Advance the window cursor to the window containing this message.
            while window_cursor < windows.len()
                && !windows[window_cursor]
                    .1
                    .iter()
                    .any(|m| m.message_id == message.message_id)
            {
                let (speaker, affect) = &window_affects[window_cursor];
                current.insert(speaker.as_str().to_string(), affect.clone());
                window_cursor += 1;
            }
            if window_cursor < windows.len() {
                let (speaker, affect) = &window_affects[window_cursor];
                current.insert(speaker.as_str().to_string(), affect.clone());
            }

            let (pad, primary, secondary, confidence) = normalize_raw(&raw);
            self.mood.push(pad.pleasure, pad.arousal);

            results.push(Affect {
                pad,
                primary_emotion: primary,
                secondary,
                intensity: pad.intensity(),
                per_speaker: current.clone(),
                confidence,
            });
        }

        results
    }

    fn score_with_fallback(&self, texts: &[&str]) -> Vec<RawAffect> {
        if texts.is_empty() {
            return Vec::new();
        }
        match self.backend.score(texts) {
            Ok(raw) if raw.len() == texts.len() => raw,
            Ok(raw) => {
                warn!(
                    expected = texts.len(),
                    got = raw.len(),
                    backend = self.backend.model_id(),
                    "backend returned a short batch, falling back to rules"
                );
                self.rules_scores(texts)
            }
            Err(e) => {
                warn!(
                    backend = self.backend.model_id(),
                    error = %e,
                    "affect backend unavailable, falling back to rules"
                );
                self.rules_scores(texts)
            }
        }
    }

    fn rules_scores(&self, texts: &[&str]) -> Vec<RawAffect> {
        // The rules backend is infallible by construction.
        let mut raw = self.fallback.score(texts).unwrap_or_default();
        for r in &mut raw {
            r.confidence = r.confidence.min(FALLBACK_MAX_CONFIDENCE);
        }
        raw
    }
}

/// Clamp, quarantine NaN, and map onto the closed vocabulary.
///
/// Returns (pad, primary, secondary, confidence).
fn normalize_raw(raw: &RawAffect) -> (Pad, Emotion, Vec<String>, f64) {
    let mut confidence = raw.confidence.clamp(0.0, 1.0);
    if !raw.pad.is_finite() {
        warn!(tag = %raw.primary_tag, "backend returned non-finite PAD, zeroing");
        confidence = 0.0;
    }
    let pad = raw.pad.clamped();

    let mut secondary = Vec::new();
    let primary = if raw.primary_tag.is_empty() {
        pad_to_emotion(&pad)
    } else {
        match Emotion::parse_name(&raw.primary_tag) {
            Some(emotion) => emotion,
            None => {
                // Preserve the raw tag; the vocabulary stays closed.
                secondary.push(raw.primary_tag.clone());
                Emotion::Other
            }
        }
    };

    // Fill the remaining secondary slots with the nearest non-primary
    // anchors, so downstream readers always see graded alternatives.
    let mut candidates: Vec<(Emotion, f64)> = crate::affect::ALL_EMOTIONS
        .iter()
        .filter(|e| **e != primary && !matches!(e, Emotion::Other | Emotion::Neutral))
        .map(|e| (*e, pad.distance(&e.pad_anchor())))
        .collect();
    candidates.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.as_str().cmp(b.0.as_str()))
    });
    for (emotion, _) in candidates.into_iter().take(3_usize.saturating_sub(secondary.len())) {
        if secondary.len() >= 3 {
            break;
        }
        secondary.push(emotion.as_str().to_string());
    }
    secondary.truncate(3);

    (pad, primary, secondary, confidence)
}

// ============================================================================
// TESTS
// ============================================================================
