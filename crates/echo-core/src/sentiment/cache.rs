//! Bounded LRU cache of context-free node scores.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::types::NodeScore;

type CacheKey = (String, String);

/// Analysis cache keyed on `(user, text)`.
///
/// Only texts up to `max_text_chars` characters are cached. A capacity of
/// zero disables the cache.
pub struct AnalysisCache {
    cache: Option<Mutex<LruCache<CacheKey, Arc<Vec<NodeScore>>>>>,
    max_text_chars: usize,
}

impl AnalysisCache {
    pub fn new(capacity: usize, max_text_chars: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            max_text_chars,
        }
    }

    /// Whether `text` is eligible for caching.
    pub fn accepts(&self, text: &str) -> bool {
        self.cache.is_some() && text.chars().count() <= self.max_text_chars
    }

    pub fn get(&self, user: &str, text: &str) -> Option<Arc<Vec<NodeScore>>> {
        if !self.accepts(text) {
            return None;
        }
        let key = (user.to_string(), text.to_string());
        self.cache.as_ref()?.lock().get(&key).cloned()
    }

    pub fn insert(&self, user: &str, text: &str, scores: Arc<Vec<NodeScore>>) {
        if !self.accepts(text) {
            return;
        }
        if let Some(cache) = &self.cache {
            cache.lock().put((user.to_string(), text.to_string()), scores);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map(|c| c.lock().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(tag: &str) -> Arc<Vec<NodeScore>> {
        Arc::new(vec![NodeScore {
            tag: tag.to_string(),
            raw: 1.0,
            priority: 0,
        }])
    }

    #[test]
    fn test_get_after_insert() {
        let cache = AnalysisCache::new(4, 200);
        cache.insert("u", "hello", scores("a"));
        assert_eq!(cache.get("u", "hello").unwrap()[0].tag, "a");
        assert!(cache.get("other", "hello").is_none());
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = AnalysisCache::new(2, 200);
        cache.insert("u", "one", scores("1"));
        cache.insert("u", "two", scores("2"));
        // Touch "one" so "two" becomes the eviction candidate
        assert!(cache.get("u", "one").is_some());
        cache.insert("u", "three", scores("3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("u", "one").is_some());
        assert!(cache.get("u", "two").is_none());
        assert!(cache.get("u", "three").is_some());
    }

    #[test]
    fn test_long_text_bypasses_cache() {
        let cache = AnalysisCache::new(4, 3);
        cache.insert("u", "four", scores("x"));
        assert!(cache.is_empty());
        assert!(cache.get("u", "four").is_none());
    }

    #[test]
    fn test_reinsert_refreshes_entry() {
        let cache = AnalysisCache::new(2, 200);
        cache.insert("u", "one", scores("1"));
        cache.insert("u", "two", scores("2"));
        cache.insert("u", "one", scores("1b"));
        cache.insert("u", "three", scores("3"));

        assert_eq!(cache.get("u", "one").unwrap()[0].tag, "1b");
        assert!(cache.get("u", "two").is_none());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = AnalysisCache::new(0, 200);
        cache.insert("u", "hi", scores("x"));
        assert!(cache.is_empty());
    }
}
