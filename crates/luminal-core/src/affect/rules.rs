//! Rules-based affect backend
//!
//! Deterministic lexicon scorer. This is both the default backend and the
//! fallback when a model backend is unavailable, so downstream components
//! always make forward progress. Confidence is capped low: keyword
//! matching is a coarse instrument and the scores say so.
//!
//! Negation handling is a simple 3-word window, which catches the common
//! "not happy" / "don't love" shapes without a parser.

use std::collections::HashMap;

use crate::affect::{AffectBackend, Emotion, Pad, RawAffect, pad_to_emotion};
use crate::error::Result;

/// Confidence ceiling for lexicon scoring.
const RULES_MAX_CONFIDENCE: f64 = 0.3;

/// Words scanned backwards from a lexicon hit for negation.
const NEGATION_WINDOW: usize = 3;

const NEGATION_WORDS: [&str; 12] = [
    "not",
    "no",
    "never",
    "don't",
    "doesn't",
    "didn't",
    "won't",
    "can't",
    "couldn't",
    "shouldn't",
    "without",
    "hardly",
];

/// Full-phrase markers that add arousal regardless of lexicon hits.
const URGENCY_MARKERS: [&str; 8] = [
    "critical",
    "urgent",
    "emergency",
    "asap",
    "right now",
    "breaking",
    "panic",
    "deadline",
];

// ============================================================================
// RULES BACKEND
// ============================================================================

/// Deterministic keyword-based affect scorer.
pub struct RulesBackend {
    /// word -> (pleasure, arousal, dominance, tag)
    lexicon: HashMap<&'static str, (f64, f64, f64, Emotion)>,
}

impl Default for RulesBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RulesBackend {
    pub fn new() -> Self {
        Self {
            lexicon: build_lexicon(),
        }
    }

    fn score_one(&self, text: &str) -> RawAffect {
        let lowered = text.to_lowercase();
        let words: Vec<String> = lowered
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                    .to_string()
            })
            .filter(|w| !w.is_empty())
            .collect();

        let mut sum = Pad::default();
        let mut hits = 0usize;
        let mut tag_votes: HashMap<Emotion, usize> = HashMap::new();

        for (i, word) in words.iter().enumerate() {
            let Some(&(p, a, d, tag)) = self.lexicon.get(word.as_str()) else {
                continue;
            };
            let negated = (i.saturating_sub(NEGATION_WINDOW)..i)
                .any(|j| NEGATION_WORDS.contains(&words[j].as_str()));

            // A negated hit flips pleasure (attenuated) but keeps arousal:
            // "not happy" is still activated, just displeased.
            let pleasure = if negated { -p * 0.7 } else { p };
            sum.pleasure += pleasure;
            sum.arousal += a;
            sum.dominance += d;
            hits += 1;
            if !negated {
                *tag_votes.entry(tag).or_default() += 1;
            }
        }

        let mut urgency_boost = 0.0;
        for marker in URGENCY_MARKERS {
            if lowered.contains(marker) {
                urgency_boost += 0.3;
            }
        }

        let pad = if hits > 0 {
            let n = hits as f64;
            Pad::new(
                sum.pleasure / n,
                (sum.arousal / n + urgency_boost).min(1.0),
                sum.dominance / n,
            )
        } else {
            Pad::new(0.0, urgency_boost.min(1.0), 0.0)
        };

        // Majority tag vote; PAD-nearest anchor breaks ties and covers the
        // no-vote case. Ties resolve by vocabulary declaration order so the
        // scorer stays deterministic.
        let primary = tag_votes
            .into_iter()
            .max_by(|(ta, ca), (tb, cb)| {
                ca.cmp(cb).then_with(|| {
                    declaration_index(*tb)
                        .cmp(&declaration_index(*ta))
                })
            })
            .map(|(tag, _)| tag)
            .unwrap_or_else(|| pad_to_emotion(&pad));

        let coverage = if words.is_empty() {
            0.0
        } else {
            hits as f64 / words.len() as f64
        };
        let confidence =
            (coverage * 0.5 + if urgency_boost > 0.0 { 0.1 } else { 0.0 }).min(RULES_MAX_CONFIDENCE);

        RawAffect {
            pad,
            primary_tag: primary.as_str().to_string(),
            confidence,
        }
    }
}

fn declaration_index(e: Emotion) -> usize {
    crate::affect::ALL_EMOTIONS
        .iter()
        .position(|&x| x == e)
        .unwrap_or(usize::MAX)
}

impl AffectBackend for RulesBackend {
    fn model_id(&self) -> &str {
        "rules/lexicon-v1"
    }

    fn score(&self, texts: &[&str]) -> Result<Vec<RawAffect>> {
        Ok(texts.iter().map(|t| self.score_one(t)).collect())
    }

    fn summarize(&self, texts: &[&str]) -> Result<String> {
        Ok(extractive_summary(texts, 3))
    }
}

// ============================================================================
// EXTRACTIVE SUMMARY
// ============================================================================

/// Deterministic extractive summary: top sentences by keyword density,
/// re-emitted in original order. Three or fewer sentences pass through
/// unchanged.
pub fn extractive_summary(texts: &[&str], max_sentences: usize) -> String {
    let joined = texts.join(" ");
    let sentences: Vec<&str> = joined
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if sentences.len() <= max_sentences.max(3) {
        return sentences.join(". ");
    }

    // Word frequency over the whole window, stop-short words ignored.
    let mut freq: HashMap<String, usize> = HashMap::new();
    for sentence in &sentences {
        for word in sentence.to_lowercase().split_whitespace() {
            if word.len() > 3 {
                *freq.entry(word.to_string()).or_default() += 1;
            }
        }
    }

    let mut scored: Vec<(usize, f64)> = sentences
        .iter()
        .enumerate()
        .map(|(i, sentence)| {
            let words: Vec<String> = sentence
                .to_lowercase()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            let score = if words.is_empty() {
                0.0
            } else {
                words
                    .iter()
                    .map(|w| freq.get(w).copied().unwrap_or(0) as f64)
                    .sum::<f64>()
                    / words.len() as f64
            };
            (i, score)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    let mut picked: Vec<usize> = scored.iter().take(max_sentences).map(|(i, _)| *i).collect();
    picked.sort_unstable();

    picked
        .into_iter()
        .map(|i| sentences[i])
        .collect::<Vec<_>>()
        .join(". ")
}

// ============================================================================
// LEXICON
// ============================================================================

fn build_lexicon() -> HashMap<&'static str, (f64, f64, f64, Emotion)> {
    use Emotion::*;
    let entries: &[(&str, (f64, f64, f64, Emotion))] = &[
        // joy / delight
        ("happy", (0.8, 0.4, 0.5, Joy)),
        ("glad", (0.7, 0.3, 0.4, Joy)),
        ("joy", (0.9, 0.5, 0.5, Joy)),
        ("yay", (0.8, 0.7, 0.4, Delight)),
        ("wonderful", (0.85, 0.5, 0.4, Delight)),
        ("amazing", (0.85, 0.65, 0.45, Delight)),
        ("delighted", (0.85, 0.6, 0.45, Delight)),
        ("fun", (0.7, 0.5, 0.3, Joy)),
        ("excited", (0.7, 0.9, 0.6, Anticipation)),
        ("thrilled", (0.8, 0.85, 0.5, Delight)),
        // love / gratitude / trust
        ("love", (0.9, 0.3, 0.2, Love)),
        ("loving", (0.9, 0.3, 0.2, Love)),
        ("adore", (0.9, 0.4, 0.2, Love)),
        ("care", (0.7, 0.1, 0.2, Love)),
        ("thanks", (0.6, 0.2, 0.1, Gratitude)),
        ("thank", (0.6, 0.2, 0.1, Gratitude)),
        ("grateful", (0.75, 0.2, 0.1, Gratitude)),
        ("trust", (0.6, -0.1, 0.35, Trust)),
        ("appreciate", (0.65, 0.15, 0.2, Gratitude)),
        // pride / accomplishment
        ("proud", (0.7, 0.5, 0.75, Pride)),
        ("accomplished", (0.7, 0.45, 0.7, Pride)),
        ("achieved", (0.7, 0.45, 0.7, Pride)),
        ("breakthrough", (0.75, 0.7, 0.6, Pride)),
        ("finished", (0.6, 0.3, 0.55, Pride)),
        ("solved", (0.65, 0.4, 0.6, Pride)),
        ("works", (0.55, 0.35, 0.5, Joy)),
        // hope / optimism / curiosity
        ("hope", (0.6, 0.25, 0.2, Hope)),
        ("hopeful", (0.6, 0.3, 0.25, Hope)),
        ("optimistic", (0.65, 0.35, 0.55, Optimism)),
        ("curious", (0.5, 0.55, 0.15, Curiosity)),
        ("interesting", (0.5, 0.45, 0.2, Curiosity)),
        ("wonder", (0.4, 0.5, 0.0, Curiosity)),
        // sadness / despair / remorse
        ("sad", (-0.6, -0.4, -0.4, Sadness)),
        ("unhappy", (-0.6, -0.3, -0.4, Sadness)),
        ("depressed", (-0.8, -0.5, -0.5, Despair)),
        ("miserable", (-0.75, -0.3, -0.5, Despair)),
        ("hopeless", (-0.85, -0.3, -0.7, Despair)),
        ("crying", (-0.7, 0.3, -0.5, Sadness)),
        ("sorry", (-0.4, 0.1, -0.4, Remorse)),
        ("regret", (-0.5, -0.2, -0.5, Remorse)),
        ("apologize", (-0.35, 0.1, -0.4, Remorse)),
        ("guilty", (-0.45, 0.25, -0.55, Guilt)),
        ("ashamed", (-0.6, 0.3, -0.65, Shame)),
        // anger / outrage / contempt
        ("angry", (-0.8, 0.8, 0.7, Anger)),
        ("mad", (-0.7, 0.7, 0.6, Anger)),
        ("furious", (-0.85, 0.9, 0.7, Outrage)),
        ("outraged", (-0.7, 0.85, 0.45, Outrage)),
        ("annoyed", (-0.5, 0.5, 0.4, Anger)),
        ("irritated", (-0.5, 0.5, 0.4, Anger)),
        ("hate", (-0.85, 0.7, 0.4, Contempt)),
        ("disgusting", (-0.6, 0.2, 0.25, Disgust)),
        ("awful", (-0.7, 0.3, 0.0, Disgust)),
        // fear / anxiety
        ("afraid", (-0.7, 0.6, -0.6, Fear)),
        ("scared", (-0.7, 0.65, -0.6, Fear)),
        ("terrified", (-0.8, 0.85, -0.7, Fear)),
        ("worried", (-0.4, 0.4, -0.3, Anxiety)),
        ("anxious", (-0.5, 0.7, -0.3, Anxiety)),
        ("nervous", (-0.4, 0.6, -0.35, Anxiety)),
        ("stressed", (-0.5, 0.6, -0.2, Anxiety)),
        // frustration family maps onto anger/disapproval
        ("frustrated", (-0.6, 0.5, -0.2, Disapproval)),
        ("frustrating", (-0.6, 0.5, -0.2, Disapproval)),
        ("stuck", (-0.4, 0.35, -0.3, Disapproval)),
        ("broken", (-0.5, 0.4, -0.1, Disapproval)),
        ("failed", (-0.6, 0.45, -0.35, Disapproval)),
        ("bug", (-0.35, 0.35, 0.0, Disapproval)),
        // surprise / awe
        ("surprised", (0.2, 0.8, -0.15, Surprise)),
        ("shocked", (-0.2, 0.85, -0.3, Surprise)),
        ("wow", (0.4, 0.8, -0.1, Awe)),
        ("incredible", (0.6, 0.75, -0.1, Awe)),
        ("unbelievable", (0.3, 0.75, -0.2, Awe)),
        // calm / content (low-arousal positives)
        ("calm", (0.3, -0.8, 0.2, Trust)),
        ("content", (0.6, -0.2, 0.3, Joy)),
        ("relaxed", (0.5, -0.5, 0.25, Joy)),
        ("comfortable", (0.55, -0.35, 0.3, Trust)),
        // determination / dominance
        ("determined", (0.2, 0.6, 0.8, Dominance)),
        ("confident", (0.5, 0.3, 0.8, Dominance)),
        ("focused", (0.3, 0.45, 0.6, Anticipation)),
    ];
    entries.iter().copied().collect()
}

// ============================================================================
// TESTS
// ============================================================================
