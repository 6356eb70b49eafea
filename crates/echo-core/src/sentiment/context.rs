//! Per-user short-term emotional state.
//!
//! A [`ContextStore`] owns one [`ContextMemory`] per user. Entries are
//! created on first write, decay by elapsed time, and the least recently
//! active user is evicted when the store is full.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use super::types::AnalysisResult;
use super::SentimentConfig;
use crate::config::config_secs;

/// One recorded analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodEntry {
    pub tag: String,
    pub score: f64,
    pub at: DateTime<Utc>,
}

/// A mood that is still influencing analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveMood {
    pub tag: String,
    /// Remaining strength in (0, 1], decaying linearly to zero at expiry.
    pub strength: f64,
}

/// Emotional state of one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextMemory {
    pub current_mood: Option<String>,
    pub mood_expiry: Option<DateTime<Utc>>,
    pub history: VecDeque<MoodEntry>,
    pub last_active: Option<DateTime<Utc>>,
}

impl ContextMemory {
    /// The current mood and its remaining strength, if not expired.
    pub fn live_mood(&self, now: DateTime<Utc>, window: Duration) -> Option<LiveMood> {
        let tag = self.current_mood.as_ref()?;
        let expiry = self.mood_expiry?;
        if now >= expiry || window <= Duration::zero() {
            return None;
        }
        let remaining = (expiry - now).num_milliseconds() as f64;
        let strength = (remaining / window.num_milliseconds() as f64).clamp(0.0, 1.0);
        Some(LiveMood {
            tag: tag.clone(),
            strength,
        })
    }

    fn set_mood(&mut self, tag: &str, now: DateTime<Utc>, window: Duration) {
        self.current_mood = Some(tag.to_string());
        self.mood_expiry = Some(now + window);
    }

    fn clear_mood(&mut self) {
        self.current_mood = None;
        self.mood_expiry = None;
    }

    fn prune(&mut self, now: DateTime<Utc>, ttl: Duration) {
        while let Some(front) = self.history.front() {
            if now - front.at > ttl {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Shared store of every user's context memory.
pub struct ContextStore {
    sessions: Mutex<HashMap<String, ContextMemory>>,
    max_sessions: usize,
    window: Duration,
    history_size: usize,
    history_ttl: Duration,
}

impl ContextStore {
    /// Create a store bounded to `max_sessions` users.
    pub fn new(config: &SentimentConfig, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
            window: config_secs(config.context_window_secs),
            history_size: config.history_size.max(1),
            history_ttl: config_secs(config.history_ttl_secs),
        }
    }

    /// Store with default tunables.
    pub fn with_defaults() -> Self {
        Self::new(&SentimentConfig::default(), 1024)
    }

    /// Mood window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Live mood of `user_id`. Unknown users have none.
    pub fn live_mood(&self, user_id: &str, now: DateTime<Utc>) -> Option<LiveMood> {
        let sessions = self.sessions.lock();
        sessions.get(user_id)?.live_mood(now, self.window)
    }

    /// Record an analysis result for `user_id`.
    ///
    /// A memorable result becomes the current mood; a result resolving to
    /// `closure_tag` clears it.
    pub fn apply_analysis(
        &self,
        user_id: &str,
        result: &AnalysisResult,
        closure_tag: &str,
        now: DateTime<Utc>,
    ) {
        let Some(tag) = result.tag.as_deref() else {
            return;
        };
        let window = self.window;
        let history_size = self.history_size;
        let ttl = self.history_ttl;
        self.with_entry(user_id, now, |memory| {
            memory.prune(now, ttl);
            memory.history.push_back(MoodEntry {
                tag: tag.to_string(),
                score: result.score,
                at: now,
            });
            while memory.history.len() > history_size {
                memory.history.pop_front();
            }

            if tag == closure_tag {
                memory.clear_mood();
            } else if result.is_memorable() {
                memory.set_mood(tag, now, window);
            }
        });
    }

    /// Seed `user_id`'s mood directly, e.g. with a tag that was just delivered.
    pub fn seed_mood(&self, user_id: &str, tag: &str, now: DateTime<Utc>) {
        let window = self.window;
        self.with_entry(user_id, now, |memory| memory.set_mood(tag, now, window));
    }

    /// Forget the lingering mood of `user_id`.
    pub fn clear(&self, user_id: &str) {
        if let Some(memory) = self.sessions.lock().get_mut(user_id) {
            memory.clear_mood();
        }
    }

    /// Unexpired history of `user_id`, oldest first.
    pub fn history(&self, user_id: &str, now: DateTime<Utc>) -> Vec<MoodEntry> {
        let sessions = self.sessions.lock();
        sessions
            .get(user_id)
            .map(|m| {
                m.history
                    .iter()
                    .filter(|e| now - e.at <= self.history_ttl)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of tracked users.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entry<F>(&self, user_id: &str, now: DateTime<Utc>, f: F)
    where
        F: FnOnce(&mut ContextMemory),
    {
        let mut sessions = self.sessions.lock();
        if !sessions.contains_key(user_id) && sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, m)| m.last_active)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!(user_id = %oldest, "Evicting least recently active context");
                sessions.remove(&oldest);
            }
        }
        let memory = sessions.entry(user_id.to_string()).or_default();
        memory.last_active = Some(now);
        f(memory);
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentiment::types::Intensity;

    fn result(tag: &str, score: f64) -> AnalysisResult {
        AnalysisResult {
            tag: Some(tag.to_string()),
            score,
            intensity: Some(Intensity::from_score(score)),
            ..AnalysisResult::none()
        }
    }

    #[test]
    fn test_unknown_user_has_no_mood() {
        let store = ContextStore::with_defaults();
        assert!(store.live_mood("nobody", Utc::now()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_moderate_result_sets_mood_with_linear_decay() {
        let store = ContextStore::with_defaults();
        let t0 = Utc::now();
        store.apply_analysis("u1", &result("comfort", 9.0), "sanity", t0);

        let fresh = store.live_mood("u1", t0).unwrap();
        assert_eq!(fresh.tag, "comfort");
        assert!((fresh.strength - 1.0).abs() < 1e-9);

        let half = store.live_mood("u1", t0 + Duration::seconds(300)).unwrap();
        assert!((half.strength - 0.5).abs() < 1e-6);

        assert!(store.live_mood("u1", t0 + Duration::seconds(601)).is_none());
    }

    #[test]
    fn test_mild_result_does_not_set_mood() {
        let store = ContextStore::with_defaults();
        let now = Utc::now();
        store.apply_analysis("u1", &result("comfort", 4.0), "sanity", now);
        assert!(store.live_mood("u1", now).is_none());
        assert_eq!(store.history("u1", now).len(), 1);
    }

    #[test]
    fn test_closure_clears_mood() {
        let store = ContextStore::with_defaults();
        let now = Utc::now();
        store.apply_analysis("u1", &result("dont_cry", 12.0), "sanity", now);
        assert!(store.live_mood("u1", now).is_some());

        store.apply_analysis("u1", &result("sanity", 4.5), "sanity", now + Duration::seconds(5));
        assert!(store.live_mood("u1", now + Duration::seconds(5)).is_none());
    }

    #[test]
    fn test_history_is_bounded_and_expires() {
        let config = SentimentConfig {
            history_size: 3,
            ..Default::default()
        };
        let store = ContextStore::new(&config, 16);
        let t0 = Utc::now();
        for i in 0..5 {
            store.apply_analysis("u1", &result("fail", 5.0), "sanity", t0 + Duration::seconds(i));
        }
        assert_eq!(store.history("u1", t0 + Duration::seconds(5)).len(), 3);
        assert!(store.history("u1", t0 + Duration::hours(2)).is_empty());
    }

    #[test]
    fn test_least_recently_active_is_evicted() {
        let store = ContextStore::new(&SentimentConfig::default(), 2);
        let t0 = Utc::now();
        store.seed_mood("a", "trust", t0);
        store.seed_mood("b", "trust", t0 + Duration::seconds(1));
        store.seed_mood("c", "trust", t0 + Duration::seconds(2));

        assert_eq!(store.len(), 2);
        assert!(store.live_mood("a", t0 + Duration::seconds(3)).is_none());
        assert!(store.live_mood("c", t0 + Duration::seconds(3)).is_some());
    }
}
