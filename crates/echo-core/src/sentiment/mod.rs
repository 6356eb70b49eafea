//! Sentiment scoring with short-term context memory.
//!
//! - [`RuleRegistry`]: emotion nodes and modifiers
//! - [`SentimentAnalyzer`]: clause-scoped keyword/pattern scoring
//! - [`ContextStore`]: per-user lingering mood and history
//! - [`AnalysisCache`]: LRU of context-free node scores

mod analyzer;
mod cache;
mod config;
mod context;
mod rules;
mod types;

pub use analyzer::{split_clauses, threshold_for, SentimentAnalyzer};
pub use cache::AnalysisCache;
pub use config::SentimentConfig;
pub use context::{ContextMemory, ContextStore, LiveMood, MoodEntry};
pub use rules::{
    EmotionNode, Modifier, ModifierKind, ModifierTable, RuleRegistry, WindowScan,
    DOUBLE_NEGATION_BOOST, FORCED_POSITIVE_BOOST,
};
pub use types::{AnalysisResult, EmotionCandidate, Intensity, NodeScore};
