//! Tunables for the sentiment scorer and context memory.
//!
//! The numeric thresholds are empirically chosen; none of them is part of a
//! stable contract.

use serde::{Deserialize, Serialize};

/// Configuration for [`SentimentAnalyzer`](super::SentimentAnalyzer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    /// Characters scanned before a match for modifiers and negations.
    pub negation_window: usize,
    /// Lifetime of a recorded mood, in seconds. The boost decays linearly to zero.
    pub context_window_secs: u64,
    /// Additive boost for the live mood tag at full strength.
    pub context_boost: f64,
    /// Maximum history entries kept per user.
    pub history_size: usize,
    /// History entries older than this are pruned, in seconds.
    pub history_ttl_secs: u64,
    /// Capacity of the analysis cache (0 disables caching).
    pub cache_capacity: usize,
    /// Longest text, in characters, that is cached.
    pub cache_max_text_chars: usize,
    /// Texts longer than this many characters are dampened.
    pub long_text_threshold: usize,
    /// Secondary candidates at or above this fraction of the winner are mixed emotions.
    pub mixed_ratio: f64,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            negation_window: 5,
            context_window_secs: 600,
            context_boost: 2.0,
            history_size: 10,
            history_ttl_secs: 1800,
            cache_capacity: 256,
            cache_max_text_chars: 200,
            long_text_threshold: 60,
            mixed_ratio: 0.6,
        }
    }
}
