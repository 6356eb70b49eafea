//! Rule registry: emotion nodes and the modifier table.
//!
//! Both tables are static data loaded once. Base scores are never mutated;
//! only the scores computed per analysis vary.

use regex::Regex;
use std::collections::HashSet;
use tracing::warn;

use crate::error::{EchoError, EchoResult};

/// Weight applied by an even number (two or more) of negations.
pub const DOUBLE_NEGATION_BOOST: f64 = 1.2;
/// Weight applied when a forced-positive idiom sits in the window.
pub const FORCED_POSITIVE_BOOST: f64 = 1.3;

/// One affect category and its matching rules.
#[derive(Debug, Clone)]
pub struct EmotionNode {
    pub tag: String,
    pub keywords: Vec<String>,
    pub patterns: Vec<Regex>,
    pub emojis: Vec<String>,
    pub base_score: f64,
    /// Higher wins ties and lowers the acceptance threshold.
    pub priority: u8,
    /// A keyword or pattern hit overlapped by one of these is voided.
    pub skip_patterns: Vec<Regex>,
}

impl EmotionNode {
    /// Create an empty node.
    pub fn new(tag: impl Into<String>, base_score: f64, priority: u8) -> Self {
        Self {
            tag: tag.into(),
            keywords: Vec::new(),
            patterns: Vec::new(),
            emojis: Vec::new(),
            base_score,
            priority,
            skip_patterns: Vec::new(),
        }
    }

    /// Set keywords. Stored lower-cased, longest first.
    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        let mut keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
        keywords.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        self.keywords = keywords;
        self
    }

    /// Set regex patterns.
    pub fn with_patterns(mut self, patterns: &[&str]) -> EchoResult<Self> {
        self.patterns = compile(patterns)?;
        Ok(self)
    }

    /// Set emoji markers.
    pub fn with_emojis(mut self, emojis: &[&str]) -> Self {
        self.emojis = emojis.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Set exclusion patterns.
    pub fn with_skip_patterns(mut self, patterns: &[&str]) -> EchoResult<Self> {
        self.skip_patterns = compile(patterns)?;
        Ok(self)
    }
}

fn compile(patterns: &[&str]) -> EchoResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| EchoError::parse(format!("Invalid pattern '{}': {}", p, e))))
        .collect()
}

/// Modifier category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierKind {
    Intensify,
    Diminish,
    Negate,
    /// Contains a negator but reads as affirmation.
    ForcedPositive,
}

/// A group of trigger words sharing one weight.
#[derive(Debug, Clone)]
pub struct Modifier {
    pub kind: ModifierKind,
    pub words: Vec<String>,
    /// Multiplicative factor; ignored for negations, which count instead.
    pub weight: f64,
}

impl Modifier {
    pub fn new(kind: ModifierKind, words: &[&str], weight: f64) -> Self {
        Self {
            kind,
            words: words.iter().map(|w| w.to_string()).collect(),
            weight,
        }
    }
}

/// What the lookback window before a match contains.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowScan {
    /// Strongest intensifier weight, 1.0 when none.
    pub intensify: f64,
    /// Strongest diminisher weight, 1.0 when none.
    pub diminish: f64,
    pub negations: usize,
    pub forced_positive: bool,
}

impl Default for WindowScan {
    fn default() -> Self {
        Self {
            intensify: 1.0,
            diminish: 1.0,
            negations: 0,
            forced_positive: false,
        }
    }
}

/// Intensifiers, diminishers, negations and forced-positive idioms.
#[derive(Debug, Clone)]
pub struct ModifierTable {
    /// (word as chars, kind, weight), longest word first.
    tokens: Vec<(Vec<char>, ModifierKind, f64)>,
}

impl ModifierTable {
    pub fn new(modifiers: Vec<Modifier>) -> Self {
        let mut tokens: Vec<(Vec<char>, ModifierKind, f64)> = modifiers
            .iter()
            .flat_map(|m| {
                m.words
                    .iter()
                    .filter(|w| !w.is_empty())
                    .map(move |w| (w.chars().collect(), m.kind, m.weight))
            })
            .collect();
        tokens.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { tokens }
    }

    /// Scan a lookback window.
    ///
    /// The window is tokenised greedily left to right, longest trigger first,
    /// so a negator inside a longer modifier (`非常`, `无比`) never counts as
    /// a negation.
    pub fn scan(&self, window: &[char]) -> WindowScan {
        let mut scan = WindowScan::default();
        let mut i = 0;
        while i < window.len() {
            let hit = self
                .tokens
                .iter()
                .find(|(word, _, _)| window[i..].starts_with(word));
            match hit {
                Some((word, kind, weight)) => {
                    match kind {
                        ModifierKind::Intensify => scan.intensify = scan.intensify.max(*weight),
                        ModifierKind::Diminish => scan.diminish = scan.diminish.min(*weight),
                        ModifierKind::Negate => scan.negations += 1,
                        ModifierKind::ForcedPositive => scan.forced_positive = true,
                    }
                    i += word.len();
                }
                None => i += 1,
            }
        }
        scan
    }

    /// Multiplier for one occurrence outside rhetorical questions.
    ///
    /// Odd negation counts flip the sign; even counts are emphatic.
    pub fn multiplier(&self, scan: &WindowScan) -> f64 {
        let base = scan.intensify * scan.diminish;
        if scan.forced_positive {
            return base * FORCED_POSITIVE_BOOST;
        }
        if scan.negations % 2 == 1 {
            -base
        } else if scan.negations >= 2 {
            base * DOUBLE_NEGATION_BOOST
        } else {
            base
        }
    }
}

/// The complete static rule set.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    nodes: Vec<EmotionNode>,
    modifiers: ModifierTable,
    closure_tag: String,
}

impl RuleRegistry {
    /// Create a registry. Tags must be unique and the closure tag must exist.
    pub fn new(
        nodes: Vec<EmotionNode>,
        modifiers: ModifierTable,
        closure_tag: impl Into<String>,
    ) -> EchoResult<Self> {
        let closure_tag = closure_tag.into();
        let mut seen = HashSet::new();
        for node in &nodes {
            if !seen.insert(node.tag.as_str()) {
                return Err(EchoError::configuration(format!("Duplicate emotion tag '{}'", node.tag)));
            }
        }
        if !seen.contains(closure_tag.as_str()) {
            return Err(EchoError::configuration(format!(
                "Closure tag '{}' has no emotion node",
                closure_tag
            )));
        }
        Ok(Self {
            nodes,
            modifiers,
            closure_tag,
        })
    }

    /// The built-in rule set.
    pub fn builtin() -> Self {
        let nodes: Vec<EmotionNode> = builtin_nodes()
            .into_iter()
            .filter_map(|node| match node {
                Ok(node) => Some(node),
                Err(e) => {
                    warn!(error = %e, "Skipping built-in emotion node");
                    None
                }
            })
            .collect();
        Self {
            nodes,
            modifiers: builtin_modifiers(),
            closure_tag: "sanity".to_string(),
        }
    }

    pub fn nodes(&self) -> &[EmotionNode] {
        &self.nodes
    }

    pub fn node(&self, tag: &str) -> Option<&EmotionNode> {
        self.nodes.iter().find(|n| n.tag == tag)
    }

    pub fn modifiers(&self) -> &ModifierTable {
        &self.modifiers
    }

    /// Tag whose detection clears a lingering mood.
    pub fn closure_tag(&self) -> &str {
        &self.closure_tag
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_modifiers() -> ModifierTable {
    ModifierTable::new(vec![
        Modifier::new(
            ModifierKind::Intensify,
            &["好", "太", "真", "非常", "超级", "死", "特别", "巨", "极其", "超", "爆"],
            1.5,
        ),
        Modifier::new(ModifierKind::Intensify, &["比较", "还", "挺", "蛮"], 1.2),
        Modifier::new(ModifierKind::Diminish, &["一点", "有点", "有些", "稍微", "似"], 0.8),
        Modifier::new(ModifierKind::Negate, &["不", "没", "别", "勿", "无", "非", "假"], -1.0),
        Modifier::new(
            ModifierKind::ForcedPositive,
            &["别提多", "无比", "不得不", "不要太", "没少", "何尝不"],
            FORCED_POSITIVE_BOOST,
        ),
    ])
}

fn builtin_nodes() -> Vec<EchoResult<EmotionNode>> {
    vec![
        EmotionNode::new("morning", 5.0, 0)
            .with_keywords(&["早安", "早上好", "早啊", "哦哈哟", "早"])
            .with_emojis(&["🌅", "☕", "🐔", "☀️"])
            .with_patterns(&[r"早$"])
            .and_then(|n| n.with_skip_patterns(&["早就", "早已", "迟早", "提早", "早晚", "早点"])),
        EmotionNode::new("sanity", 4.0, 0)
            .with_keywords(&["晚安", "睡了", "睡觉", "好梦", "累", "休息", "洗澡", "困"])
            .with_emojis(&["💤", "🌙", "🛌", "🥱", "😪"])
            .with_patterns(&[r"(去|要)睡", r"好{0,2}累", r"困.*死"])
            .and_then(|n| n.with_skip_patterns(&["积累", "累计", "累积", "困难", "困扰"])),
        EmotionNode::new("dont_cry", 6.0, 1)
            .with_keywords(&["痛苦", "想哭", "破防", "崩溃", "难受", "甚至想笑", "地狱", "玉玉", "emo", "呜"])
            .with_emojis(&["😭", "😢", "💔", "🥀", "💧"])
            .with_patterns(&[r"好{0,2}(痛|苦)", r"呜{3,}", r"不想.*活"])
            .and_then(|n| n.with_skip_patterns(&["哭笑不得", "笑哭", "苦笑", "辛苦", "痛快"])),
        EmotionNode::new("comfort", 6.0, 2)
            .with_keywords(&["救命", "害怕", "恐怖", "吓人", "难过", "伤心", "委屈", "help"])
            .with_emojis(&["😱", "😨", "😖", "🆘"])
            .with_patterns(&[r"被.*吓", r"好{0,2}怕", r"救.*命"])
            .and_then(|n| n.with_skip_patterns(&["恐怕", "哪怕", "怕不是", "救命稻草"])),
        EmotionNode::new("fail", 5.0, 0)
            .with_keywords(&["失败", "输了", "白给", "寄了", "如果", "假如", "后悔", "麻了", "菜"])
            .with_emojis(&["🏳️", "💀", "👎"])
            .with_patterns(&[r"打.*不过", r"过.*不去"])
            .and_then(|n| n.with_skip_patterns(&["蔬菜", "菜单", "做菜", "菜谱"])),
        EmotionNode::new("company", 4.0, 0)
            .with_keywords(&["孤独", "寂寞", "没人", "一个人", "无聊", "冷清"])
            .with_emojis(&["🍃", "🍂", "🪹"])
            .with_patterns(&[r"理.*我"])
            .and_then(|n| n.with_skip_patterns(&["没人比", "理解", "理由"])),
        EmotionNode::new("trust", 5.0, 0)
            .with_keywords(&["抱抱", "贴贴", "喜欢", "爱", "老婆", "特雷西娅", "殿下", "想你"])
            .with_emojis(&["❤️", "🥰", "🤗", "😘", "💍"])
            .with_patterns(&[r"最.*喜欢", r"爱.*你", r"想.*你"])
            .and_then(|n| n.with_skip_patterns(&["爱好", "恋爱脑"])),
        EmotionNode::new("poke", 3.0, 0)
            .with_keywords(&["戳", "揉", "摸", "捣"])
            .with_emojis(&["👈", "👆"])
            .with_skip_patterns(&["摸鱼", "捣乱"]),
    ]
}
