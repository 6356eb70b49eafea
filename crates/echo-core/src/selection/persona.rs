//! Tag expansion tables.
//!
//! Both tables are editorial data kept apart from the scorer and selector
//! so they can be tuned, swapped and tested on their own.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{EchoError, EchoResult};

/// Tags that read as distress; they fall back to the comfort pool.
pub const NEGATIVE_LEANING: &[&str] = &[
    "comfort", "dont_cry", "fail", "company", "sad", "angry", "fear", "lonely",
];

/// Tag used for the negative-leaning fallback.
pub const COMFORT_TAG: &str = "comfort";

pub fn is_negative_leaning(tag: &str) -> bool {
    NEGATIVE_LEANING.contains(&tag)
}

fn entry(key: &str, values: &[&str]) -> (String, Vec<String>) {
    (key.to_string(), values.iter().map(|v| v.to_string()).collect())
}

/// Maps the user's detected emotion to the tags the persona answers with.
///
/// The persona does not mirror the user: anger is met with patience, not an
/// angry line. Unmapped emotions answer with themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaAdapter {
    #[serde(default)]
    pub name: String,
    pub responses: HashMap<String, Vec<String>>,
}

impl PersonaAdapter {
    pub fn new(name: impl Into<String>, responses: HashMap<String, Vec<String>>) -> Self {
        Self {
            name: name.into(),
            responses: responses
                .into_iter()
                .map(|(k, vs)| (k.to_lowercase(), vs.into_iter().map(|v| v.to_lowercase()).collect()))
                .collect(),
        }
    }

    /// The default persona table.
    pub fn builtin() -> Self {
        Self::new(
            "theresia",
            HashMap::from([
                entry("comfort", &["comfort", "dont_cry"]),
                entry("dont_cry", &["dont_cry", "comfort"]),
                entry("fail", &["fail", "comfort"]),
                entry("company", &["company", "trust"]),
                entry("angry", &["comfort", "sanity"]),
                entry("poke", &["poke", "trust"]),
            ]),
        )
    }

    /// Load a persona table from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> EchoResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(raw: &str) -> EchoResult<Self> {
        let parsed: Self = serde_json::from_str(raw)
            .map_err(|e| EchoError::configuration(format!("Invalid persona table: {}", e)))?;
        Ok(Self::new(parsed.name, parsed.responses))
    }

    /// Response tags for `emotion`, primary first.
    pub fn respond(&self, emotion: &str) -> Vec<String> {
        match self.responses.get(emotion) {
            Some(tags) if !tags.is_empty() => tags.clone(),
            _ => vec![emotion.to_string()],
        }
    }
}

impl Default for PersonaAdapter {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Maps abstract emotions to concrete catalog tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynonymTable {
    pub entries: HashMap<String, Vec<String>>,
}

impl SynonymTable {
    pub fn builtin() -> Self {
        Self {
            entries: HashMap::from([
                entry("sad", &["comfort", "dont_cry"]),
                entry("angry", &["comfort", "sanity"]),
                entry("fear", &["comfort"]),
                entry("tired", &["sanity"]),
                entry("lonely", &["company", "trust"]),
                entry("love", &["trust"]),
                entry("greeting", &["morning"]),
                entry("night", &["sanity"]),
                entry("happy", &["trust", "poke"]),
                entry("touch", &["poke"]),
            ]),
        }
    }

    /// `tag` followed by its concrete synonyms.
    pub fn expand(&self, tag: &str) -> Vec<String> {
        let mut out = vec![tag.to_string()];
        if let Some(synonyms) = self.entries.get(tag) {
            for s in synonyms {
                if !out.contains(s) {
                    out.push(s.clone());
                }
            }
        }
        out
    }
}

impl Default for SynonymTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_does_not_mirror_anger() {
        let persona = PersonaAdapter::builtin();
        assert_eq!(persona.respond("angry"), vec!["comfort", "sanity"]);
        assert_eq!(persona.respond("comfort")[0], "comfort");
    }

    #[test]
    fn test_unmapped_emotion_answers_with_itself() {
        let persona = PersonaAdapter::builtin();
        assert_eq!(persona.respond("morning"), vec!["morning"]);
    }

    #[test]
    fn test_persona_from_json_is_swappable() {
        let persona = PersonaAdapter::from_json(
            r#"{"name": "stern", "responses": {"Comfort": ["Sanity"]}}"#,
        )
        .unwrap();
        assert_eq!(persona.name, "stern");
        assert_eq!(persona.respond("comfort"), vec!["sanity"]);
        assert!(PersonaAdapter::from_json("{").is_err());
    }

    #[test]
    fn test_synonym_expansion() {
        let synonyms = SynonymTable::builtin();
        assert_eq!(synonyms.expand("sad"), vec!["sad", "comfort", "dont_cry"]);
        assert_eq!(synonyms.expand("trust"), vec!["trust"]);
    }

    #[test]
    fn test_negative_leaning() {
        assert!(is_negative_leaning("fail"));
        assert!(!is_negative_leaning("morning"));
    }
}
