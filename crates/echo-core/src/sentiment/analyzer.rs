//! Rule-based sentiment scorer.
//!
//! Scoring runs in two stages. The context-free stage turns text into one
//! raw score per emotion node (clause splitting, modifier windows, negation
//! parity, exclusion patterns, diminishing returns and global adjustments)
//! and is cached. The contextual stage adds the user's lingering mood,
//! applies thresholds, ranks candidates and updates context memory.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::cache::AnalysisCache;
use super::context::ContextStore;
use super::rules::{EmotionNode, RuleRegistry};
use super::types::{AnalysisResult, EmotionCandidate, Intensity, NodeScore};
use super::SentimentConfig;

/// Score bonus for a regex pattern hit over the node base score.
pub const PATTERN_BONUS: f64 = 2.0;
/// Flat contribution of one emoji marker.
pub const EMOJI_SCORE: f64 = 1.5;
/// Dampening applied inside an ordinary question.
pub const QUESTION_DAMPENING: f64 = 0.7;
/// Weight of a negated rhetorical question.
pub const RHETORICAL_AFFIRMATION: f64 = 1.5;

const EXCLAMATION_BOOST: f64 = 0.2;
const ELLIPSIS_BOOST: f64 = 0.1;
const REPETITION_BOOST: f64 = 0.1;
const MIN_LENGTH_FACTOR: f64 = 0.5;
/// Confidence softness: distance above threshold at which confidence is 0.5.
const CONFIDENCE_SCALE: f64 = 5.0;
const PRIORITY_CONFIDENCE_BONUS: f64 = 0.1;

static RHETORICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"难道|怎么可能|怎能|岂|何尝|谁说").unwrap());

/// Acceptance threshold for a node of the given priority.
pub fn threshold_for(priority: u8) -> f64 {
    match priority {
        0 => 3.0,
        1 => 2.5,
        _ => 2.0,
    }
}

fn is_terminator(c: char) -> bool {
    matches!(c, '。' | '！' | '？' | '!' | '?' | '；' | ';' | '\n' | '…' | '.')
}

/// Split text into clauses. Terminators stay attached to their clause;
/// commas do not split.
pub fn split_clauses(text: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut closing = false;
    for c in text.chars() {
        if is_terminator(c) {
            current.push(c);
            closing = true;
            continue;
        }
        if closing {
            if !current.trim().is_empty() {
                clauses.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
            closing = false;
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        clauses.push(current);
    }
    clauses
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClauseMood {
    Plain,
    Question,
    Rhetorical,
}

fn classify_clause(clause: &str) -> ClauseMood {
    if RHETORICAL.is_match(clause) {
        return ClauseMood::Rhetorical;
    }
    let body = clause.trim_end_matches(|c: char| is_terminator(c) || c.is_whitespace());
    if clause.contains('?') || clause.contains('？') || body.ends_with('吗') || body.ends_with('呢') {
        ClauseMood::Question
    } else {
        ClauseMood::Plain
    }
}

fn overlaps(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Sum per-trigger contributions with diminishing returns for repetition.
///
/// Positive hits of one trigger aggregate as `mean * (1 + ln n)`; negative
/// hits add linearly so repeated denial is never softened.
fn aggregate(contributions: &[f64]) -> f64 {
    let positives: Vec<f64> = contributions.iter().copied().filter(|v| *v > 0.0).collect();
    let negatives: f64 = contributions.iter().copied().filter(|v| *v < 0.0).sum();
    let positive = if positives.is_empty() {
        0.0
    } else {
        let n = positives.len() as f64;
        let mean = positives.iter().sum::<f64>() / n;
        mean * (1.0 + n.ln())
    };
    positive + negatives
}

fn global_factor(text: &str, long_text_threshold: usize) -> f64 {
    let mut boost = 1.0;
    if text.contains('!') || text.contains('！') {
        boost += EXCLAMATION_BOOST;
    }
    if text.contains("...") || text.contains('…') || text.contains("。。。") {
        boost += ELLIPSIS_BOOST;
    }
    let chars: Vec<char> = text.chars().collect();
    if chars
        .windows(3)
        .any(|w| w[0] == w[1] && w[1] == w[2] && !w[0].is_whitespace())
    {
        boost += REPETITION_BOOST;
    }

    let len = chars.len();
    if long_text_threshold > 0 && len > long_text_threshold {
        boost *= (long_text_threshold as f64 / len as f64).sqrt().max(MIN_LENGTH_FACTOR);
    }
    boost
}

/// Rule-based sentiment scorer with per-user context memory.
pub struct SentimentAnalyzer {
    registry: Arc<RuleRegistry>,
    config: SentimentConfig,
    context: Arc<ContextStore>,
    cache: AnalysisCache,
}

impl SentimentAnalyzer {
    /// Create an analyzer writing to a shared context store.
    pub fn new(registry: Arc<RuleRegistry>, config: SentimentConfig, context: Arc<ContextStore>) -> Self {
        let cache = AnalysisCache::new(config.cache_capacity, config.cache_max_text_chars);
        Self {
            registry,
            config,
            context,
            cache,
        }
    }

    /// Analyzer with the built-in rules, default tunables and its own store.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(RuleRegistry::builtin()),
            SentimentConfig::default(),
            Arc::new(ContextStore::with_defaults()),
        )
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn context(&self) -> &Arc<ContextStore> {
        &self.context
    }

    pub fn cache(&self) -> &AnalysisCache {
        &self.cache
    }

    /// Winning tag and its score. `(None, 0.0)` means no signal.
    pub fn analyze(&self, text: &str, user_id: Option<&str>) -> (Option<String>, f64) {
        let result = self.analyze_detailed(text, user_id);
        (result.tag, result.score)
    }

    /// Full analysis at the current time.
    pub fn analyze_detailed(&self, text: &str, user_id: Option<&str>) -> AnalysisResult {
        self.analyze_detailed_at(text, user_id, Utc::now())
    }

    /// Full analysis at `now`. Updates the user's context memory.
    pub fn analyze_detailed_at(
        &self,
        text: &str,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> AnalysisResult {
        if text.trim().is_empty() {
            return AnalysisResult::none();
        }

        let cache_user = user_id.unwrap_or("");
        let scores = match self.cache.get(cache_user, text) {
            Some(hit) => hit,
            None => {
                let computed = Arc::new(self.score_nodes(text));
                self.cache.insert(cache_user, text, Arc::clone(&computed));
                computed
            }
        };

        let mood = user_id.and_then(|u| self.context.live_mood(u, now));

        let mut candidates: Vec<(EmotionCandidate, f64)> = scores
            .iter()
            .filter_map(|node| {
                let boost = match &mood {
                    Some(m) if m.tag == node.tag && node.raw > 0.0 => self.config.context_boost * m.strength,
                    _ => 0.0,
                };
                let score = node.raw + boost;
                if score <= 0.0 || score < threshold_for(node.priority) {
                    return None;
                }
                Some((
                    EmotionCandidate {
                        tag: node.tag.clone(),
                        score,
                        priority: node.priority,
                    },
                    boost,
                ))
            })
            .collect();

        candidates.sort_by(|(a, _), (b, _)| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.tag.cmp(&b.tag))
        });

        let mut ranked = candidates.into_iter();
        let Some((winner, influence)) = ranked.next() else {
            debug!(user_id = ?user_id, "No emotion above threshold");
            return AnalysisResult::none();
        };

        let cutoff = winner.score * self.config.mixed_ratio;
        let mixed_emotions: Vec<EmotionCandidate> = ranked
            .map(|(c, _)| c)
            .filter(|c| c.score >= cutoff)
            .collect();

        let distance = (winner.score - threshold_for(winner.priority)).max(0.0);
        let confidence = (distance / (distance + CONFIDENCE_SCALE)
            + PRIORITY_CONFIDENCE_BONUS * winner.priority as f64)
            .clamp(0.0, 1.0);

        let result = AnalysisResult {
            tag: Some(winner.tag.clone()),
            score: winner.score,
            priority: winner.priority,
            confidence,
            intensity: Some(Intensity::from_score(winner.score)),
            mixed_emotions,
            context_influence: influence,
        };

        debug!(
            user_id = ?user_id,
            tag = %winner.tag,
            score = winner.score,
            context_influence = influence,
            "Analyzed text"
        );

        if let Some(user) = user_id {
            self.context
                .apply_analysis(user, &result, self.registry.closure_tag(), now);
        }
        result
    }

    /// Context-free raw score of every node with at least one hit.
    pub fn score_nodes(&self, text: &str) -> Vec<NodeScore> {
        let lowered = text.to_lowercase();
        let clauses = split_clauses(&lowered);
        let factor = global_factor(text, self.config.long_text_threshold);

        self.registry
            .nodes()
            .iter()
            .filter_map(|node| {
                let mut contributions: HashMap<String, Vec<f64>> = HashMap::new();
                for clause in &clauses {
                    self.score_clause(node, clause, &mut contributions);
                }
                for emoji in &node.emojis {
                    let n = text.matches(emoji.as_str()).count();
                    if n > 0 {
                        contributions
                            .entry(emoji.clone())
                            .or_default()
                            .extend(std::iter::repeat(EMOJI_SCORE).take(n));
                    }
                }
                if contributions.is_empty() {
                    return None;
                }
                let raw: f64 = contributions.values().map(|c| aggregate(c)).sum();
                Some(NodeScore {
                    tag: node.tag.clone(),
                    raw: raw * factor,
                    priority: node.priority,
                })
            })
            .collect()
    }

    fn score_clause(&self, node: &EmotionNode, clause: &str, out: &mut HashMap<String, Vec<f64>>) {
        let chars: Vec<char> = clause.chars().collect();
        let mood = classify_clause(clause);
        let skips: Vec<(usize, usize)> = node
            .skip_patterns
            .iter()
            .flat_map(|p| p.find_iter(clause).map(|m| (m.start(), m.end())))
            .collect();
        let mut taken: Vec<(usize, usize)> = Vec::new();

        let mut hits: Vec<(String, usize, f64)> = Vec::new();
        for keyword in &node.keywords {
            for (start, matched) in clause.match_indices(keyword.as_str()) {
                let span = (start, start + matched.len());
                if taken.iter().any(|t| overlaps(*t, span)) {
                    continue;
                }
                taken.push(span);
                if skips.iter().any(|s| overlaps(*s, span)) {
                    continue;
                }
                hits.push((keyword.clone(), start, node.base_score));
            }
        }
        for pattern in &node.patterns {
            for m in pattern.find_iter(clause) {
                let span = (m.start(), m.end());
                if m.start() == m.end() || taken.iter().any(|t| overlaps(*t, span)) {
                    continue;
                }
                taken.push(span);
                if skips.iter().any(|s| overlaps(*s, span)) {
                    continue;
                }
                hits.push((pattern.as_str().to_string(), m.start(), node.base_score + PATTERN_BONUS));
            }
        }

        for (trigger, byte_start, base) in hits {
            let char_start = clause[..byte_start].chars().count();
            let from = char_start.saturating_sub(self.config.negation_window);
            let window = &chars[from..char_start];
            let multiplier = self.window_multiplier(window, mood);
            out.entry(trigger).or_default().push(base * multiplier);
        }
    }

    fn window_multiplier(&self, window: &[char], mood: ClauseMood) -> f64 {
        let table = self.registry.modifiers();
        let scan = table.scan(window);
        match mood {
            ClauseMood::Rhetorical => {
                let base = scan.intensify * scan.diminish;
                if scan.forced_positive {
                    table.multiplier(&scan)
                } else if scan.negations % 2 == 1 {
                    base * RHETORICAL_AFFIRMATION
                } else {
                    -base
                }
            }
            ClauseMood::Question => table.multiplier(&scan) * QUESTION_DAMPENING,
            ClauseMood::Plain => table.multiplier(&scan),
        }
    }
}

impl Default for SentimentAnalyzer {
    fn default() -> Self {
        Self::with_defaults()
    }
}
