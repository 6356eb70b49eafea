//! Decision orchestrator.
//!
//! Ties the scorer, context memory and time-of-day signals into one tag for
//! both the reactive path (inbound events) and the proactive path
//! (scheduled broadcasts), then hands the tag to the selector.

use chrono::{DateTime, Local, NaiveDateTime, Timelike, Utc};
use parking_lot::Mutex;
use rand::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use strum::Display;
use tracing::{debug, info};

use crate::config::{config_secs, ConfigStore, EchoConfig, NightHours};
use crate::events::{EventKind, PlatformEvent};
use crate::selection::{AssetCatalog, ResourceSelector};
use crate::sentiment::{AnalysisResult, ContextStore, RuleRegistry, SentimentAnalyzer};

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DecisionReason {
    /// Master switch off.
    Disabled,
    /// Message addressed to the command handler.
    Command,
    /// Session replied to too recently.
    Cooldown,
    /// Pre-classified gesture.
    Interaction,
    /// Scored emotion.
    Emotion,
    /// Summon keyword without emotional signal.
    Summoned,
    /// Nothing to answer.
    NoSignal,
}

/// Outcome of [`DecisionOrchestrator::decide`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Tag to answer with; `None` means stay silent.
    pub tag: Option<String>,
    pub reason: DecisionReason,
    /// Scorer output for message events.
    pub analysis: Option<AnalysisResult>,
}

impl Decision {
    fn silent(reason: DecisionReason) -> Self {
        Self {
            tag: None,
            reason,
            analysis: None,
        }
    }
}

/// A chosen reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub session_id: String,
    pub tag: Option<String>,
    pub asset_id: String,
    pub path: PathBuf,
    pub reason: DecisionReason,
}

/// Time-of-day heuristic: night → `sanity`, 5–10 → `morning`, else `company`.
pub fn time_of_day_tag(night: &NightHours, hour: u32) -> &'static str {
    if night.contains(hour) {
        "sanity"
    } else if (5..10).contains(&hour) {
        "morning"
    } else {
        "company"
    }
}

/// Owns the per-session state shared by the reactive and scheduled paths.
pub struct DecisionOrchestrator {
    config: Arc<dyn ConfigStore>,
    analyzer: Arc<SentimentAnalyzer>,
    selector: Arc<ResourceSelector>,
    last_reply: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl DecisionOrchestrator {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        analyzer: Arc<SentimentAnalyzer>,
        selector: Arc<ResourceSelector>,
    ) -> Self {
        Self {
            config,
            analyzer,
            selector,
            last_reply: Mutex::new(HashMap::new()),
        }
    }

    /// Build the scorer and selector from the current configuration.
    pub fn from_config(config: Arc<dyn ConfigStore>, catalog: AssetCatalog) -> Self {
        let snapshot = config.snapshot();
        let context = Arc::new(ContextStore::new(
            &snapshot.sentiment,
            snapshot.sessions.max_sessions,
        ));
        let analyzer = Arc::new(SentimentAnalyzer::new(
            Arc::new(RuleRegistry::builtin()),
            snapshot.sentiment.clone(),
            context,
        ));
        let selector = Arc::new(
            ResourceSelector::new(catalog, snapshot.selector.clone())
                .with_min_quality(snapshot.voice.min_quality),
        );
        Self::new(config, analyzer, selector)
    }

    pub fn config(&self) -> &Arc<dyn ConfigStore> {
        &self.config
    }

    pub fn analyzer(&self) -> &Arc<SentimentAnalyzer> {
        &self.analyzer
    }

    pub fn selector(&self) -> &Arc<ResourceSelector> {
        &self.selector
    }

    pub fn context(&self) -> &Arc<ContextStore> {
        self.analyzer.context()
    }

    /// Decide which tag, if any, answers `event`.
    pub fn decide(&self, event: &PlatformEvent) -> Decision {
        let config = self.config.snapshot();
        if !config.enabled {
            return Decision::silent(DecisionReason::Disabled);
        }
        let now = event.timestamp;
        let session = event.session_id.as_str();

        match &event.kind {
            EventKind::Interaction { kind } => {
                let tag = kind.tag();
                if tag.is_empty() {
                    return Decision::silent(DecisionReason::NoSignal);
                }
                if !self.claim_reply(session, &config, now) {
                    return Decision::silent(DecisionReason::Cooldown);
                }
                Decision {
                    tag: Some(tag),
                    reason: DecisionReason::Interaction,
                    analysis: None,
                }
            }
            EventKind::Message { text } => {
                let text = text.trim();
                if text.is_empty() {
                    return Decision::silent(DecisionReason::NoSignal);
                }
                if !config.command.prefix.is_empty() && text.starts_with(&config.command.prefix) {
                    return Decision::silent(DecisionReason::Command);
                }

                // Scored even while cooling down so context memory stays current
                let analysis = self.analyzer.analyze_detailed_at(text, Some(session), now);

                let (tag, reason) = if let Some(tag) = analysis.tag.clone() {
                    (Some(tag), DecisionReason::Emotion)
                } else if mentions_keyword(text, &config.command.keywords) {
                    let hour = now.with_timezone(&Local).hour();
                    (
                        Some(time_of_day_tag(&config.night_hours, hour).to_string()),
                        DecisionReason::Summoned,
                    )
                } else {
                    (None, DecisionReason::NoSignal)
                };

                if tag.is_some() && !self.claim_reply(session, &config, now) {
                    return Decision {
                        tag: None,
                        reason: DecisionReason::Cooldown,
                        analysis: Some(analysis),
                    };
                }
                debug!(session_id = %session, tag = ?tag, reason = %reason, "Decided");
                Decision {
                    tag,
                    reason,
                    analysis: Some(analysis),
                }
            }
        }
    }

    /// Decide and select an asset for `event`.
    pub fn respond(&self, event: &PlatformEvent) -> Option<Response> {
        let decision = self.decide(event);
        let tag = decision.tag?;

        let asset_id = match self.select_for(Some(&tag)) {
            Some(id) => id,
            None if decision.reason == DecisionReason::Summoned => self.select_for(None)?,
            None => {
                debug!(tag = %tag, "No asset for decided tag");
                return None;
            }
        };
        let path = self.selector.resolve(&asset_id)?;

        info!(session_id = %event.session_id, tag = %tag, asset = %asset_id, "Responding");
        Some(Response {
            session_id: event.session_id.clone(),
            tag: Some(tag),
            asset_id,
            path,
            reason: decision.reason,
        })
    }

    /// Direct asset request; bypasses scoring. `None` uses the configured
    /// default tag, or the whole catalog when that is empty too.
    pub fn select_for(&self, tag: Option<&str>) -> Option<String> {
        match tag.map(str::trim).filter(|t| !t.is_empty()) {
            Some(tag) => self.selector.select(Some(tag)),
            None => {
                let default_tag = self.config.snapshot().voice.default_tag;
                let default_tag = default_tag.trim();
                self.selector
                    .select((!default_tag.is_empty()).then_some(default_tag))
            }
        }
    }

    /// Absolute path of a selected asset.
    pub fn resolve(&self, asset_id: &str) -> Option<PathBuf> {
        self.selector.resolve(asset_id)
    }

    /// Time-of-day tag under the current night-hours setting.
    pub fn time_of_day_tag(&self, hour: u32) -> &'static str {
        time_of_day_tag(&self.config.snapshot().night_hours, hour)
    }

    /// Content tag for a scheduled broadcast at local time `now`.
    pub fn scheduled_tag(&self, config: &EchoConfig, now: NaiveDateTime) -> String {
        self.scheduled_tag_with_rng(config, now, &mut thread_rng())
    }

    /// A random configured tag, else the time-of-day tag.
    pub fn scheduled_tag_with_rng<R: Rng + ?Sized>(
        &self,
        config: &EchoConfig,
        now: NaiveDateTime,
        rng: &mut R,
    ) -> String {
        let configured: Vec<&String> = config
            .schedule
            .tags
            .iter()
            .filter(|t| !t.trim().is_empty())
            .collect();
        match configured.choose(rng) {
            Some(tag) => tag.trim().to_lowercase(),
            None => time_of_day_tag(&config.night_hours, now.hour()).to_string(),
        }
    }

    /// Let a delivered tag color the session's next replies.
    pub fn record_delivery(&self, session_id: &str, tag: &str, now: DateTime<Utc>) {
        self.context().seed_mood(session_id, tag, now);
    }

    /// Claim the session's reply slot. `false` while it is still cooling down.
    fn claim_reply(&self, session: &str, config: &EchoConfig, now: DateTime<Utc>) -> bool {
        if config.cooldown.base_secs == 0 {
            return true;
        }
        let window = config_secs(config.cooldown.base_secs);
        let mut last_reply = self.last_reply.lock();
        if let Some(last) = last_reply.get(session) {
            if now - *last < window {
                return false;
            }
        } else {
            let max_sessions = config.sessions.max_sessions.max(1);
            if last_reply.len() >= max_sessions {
                last_reply.retain(|_, last| now - *last < window);
            }
            while last_reply.len() >= max_sessions {
                let Some(oldest) = last_reply
                    .iter()
                    .min_by_key(|(_, last)| **last)
                    .map(|(id, _)| id.clone())
                else {
                    break;
                };
                last_reply.remove(&oldest);
            }
        }
        last_reply.insert(session.to_string(), now);
        true
    }

    #[cfg(test)]
    fn tracked_sessions(&self) -> usize {
        self.last_reply.lock().len()
    }
}

/// Case-insensitive match of any non-blank summon keyword.
fn mentions_keyword(text: &str, keywords: &[String]) -> bool {
    let text = text.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .any(|k| text.contains(&k.to_lowercase()))
}
