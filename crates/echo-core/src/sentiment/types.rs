//! Analysis result types.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Score cut-points between intensity bands.
pub const MODERATE_CUTOFF: f64 = 6.0;
pub const SEVERE_CUTOFF: f64 = 10.0;
pub const EXTREME_CUTOFF: f64 = 15.0;

/// Ordinal strength of the winning emotion.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Mild,
    Moderate,
    Severe,
    Extreme,
}

impl Intensity {
    /// Map a final score into its band.
    pub fn from_score(score: f64) -> Self {
        if score >= EXTREME_CUTOFF {
            Self::Extreme
        } else if score >= SEVERE_CUTOFF {
            Self::Severe
        } else if score >= MODERATE_CUTOFF {
            Self::Moderate
        } else {
            Self::Mild
        }
    }
}

/// A ranked emotion candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionCandidate {
    pub tag: String,
    pub score: f64,
    pub priority: u8,
}

/// Context-free score of one emotion node for one text.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeScore {
    pub tag: String,
    /// Sum of all contributions after global adjustments; negative means
    /// evidence against the tag.
    pub raw: f64,
    pub priority: u8,
}

/// Outcome of a detailed analysis. Created per call, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Winning tag, `None` when no candidate cleared its threshold.
    pub tag: Option<String>,
    /// Final score of the winner, 0 for no signal.
    pub score: f64,
    pub priority: u8,
    /// Normalized distance above the winner's threshold, in [0, 1].
    pub confidence: f64,
    pub intensity: Option<Intensity>,
    /// Other candidates close to the winner, best first.
    pub mixed_emotions: Vec<EmotionCandidate>,
    /// Boost contributed by the user's lingering mood.
    pub context_influence: f64,
}

impl AnalysisResult {
    /// The "no signal" result.
    pub fn none() -> Self {
        Self {
            tag: None,
            score: 0.0,
            priority: 0,
            confidence: 0.0,
            intensity: None,
            mixed_emotions: Vec::new(),
            context_influence: 0.0,
        }
    }

    /// Whether a tag was found.
    pub fn has_signal(&self) -> bool {
        self.tag.is_some()
    }

    /// Whether the result is strong enough to linger as the user's mood.
    pub fn is_memorable(&self) -> bool {
        matches!(self.intensity, Some(i) if i >= Intensity::Moderate)
    }
}
