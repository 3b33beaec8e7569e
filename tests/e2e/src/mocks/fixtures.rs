//! Log-line factories and scripted affect backends.

use luminal_core::{AffectBackend, Pad, RawAffect};

/// A user-role JSONL record.
pub fn user_line(content: &str) -> String {
    serde_json::json!({ "role": "user", "content": content }).to_string()
}

/// An assistant-role JSONL record.
pub fn assistant_line(content: &str) -> String {
    serde_json::json!({ "role": "assistant", "content": content }).to_string()
}

/// A record carrying an explicit uuid (which becomes the message id).
pub fn line_with_uuid(role: &str, content: &str, uuid: &str) -> String {
    serde_json::json!({ "role": role, "content": content, "uuid": uuid }).to_string()
}

// ============================================================================
// FIXED BACKEND
// ============================================================================

/// A backend that returns one fixed assessment for every text. Lets a
/// scenario force exact intensities through the pipeline.
pub struct FixedAffectBackend {
    pub pad: Pad,
    pub tag: &'static str,
    pub confidence: f64,
}

impl FixedAffectBackend {
    /// A backend whose output lands at the requested intensity with
    /// positive valence (`intensity = |pad| / sqrt(3)`, so equal
    /// components of that magnitude hit it exactly).
    pub fn with_intensity(intensity: f64, tag: &'static str) -> Self {
        Self {
            pad: Pad::new(intensity, intensity, intensity),
            tag,
            confidence: 0.9,
        }
    }
}

impl AffectBackend for FixedAffectBackend {
    fn model_id(&self) -> &str {
        "fixed/test"
    }

    fn score(&self, texts: &[&str]) -> luminal_core::Result<Vec<RawAffect>> {
        Ok(texts
            .iter()
            .map(|_| RawAffect {
                pad: self.pad,
                primary_tag: self.tag.to_string(),
                confidence: self.confidence,
            })
            .collect())
    }

    fn summarize(&self, texts: &[&str]) -> luminal_core::Result<String> {
        Ok(texts.first().map(|t| t.to_string()).unwrap_or_default())
    }
}
