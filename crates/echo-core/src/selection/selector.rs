//! Weighted, repetition-averse asset selection.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::catalog::{AssetCatalog, QualityLevel};
use super::persona::{is_negative_leaning, PersonaAdapter, SynonymTable, COMFORT_TAG};
use crate::config::config_secs;
use crate::persistence::{load_json, PersistenceWorker};

/// Name of the usage file inside the state directory.
pub const USAGE_FILE: &str = "usage.json";

/// Selector tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Recent picks excluded from larger pools.
    pub history_size: usize,
    /// Weight divisor growth per use: `base / (1 + usage * decay)`.
    pub usage_decay: f64,
    /// Idle time after which an asset gets the recovery bonus, in seconds.
    pub idle_recovery_secs: u64,
    pub recovery_bonus: f64,
    /// Uniform jitter half-width applied to every weight.
    pub jitter: f64,
    /// Chance per selection of halving every usage counter.
    pub global_decay_probability: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            history_size: 5,
            usage_decay: 0.3,
            idle_recovery_secs: 3600,
            recovery_bonus: 1.2,
            jitter: 0.1,
            global_decay_probability: 0.05,
        }
    }
}

/// Persisted usage of one asset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub usage_count: u32,
    pub last_used: Option<DateTime<Utc>>,
}

struct SelectionState {
    catalog: AssetCatalog,
    history: VecDeque<String>,
}

/// Picks one asset for a tag.
pub struct ResourceSelector {
    config: SelectorConfig,
    min_quality: QualityLevel,
    persona: PersonaAdapter,
    synonyms: SynonymTable,
    state: Mutex<SelectionState>,
    persistence: Option<(Arc<PersistenceWorker>, PathBuf)>,
}

impl ResourceSelector {
    pub fn new(catalog: AssetCatalog, config: SelectorConfig) -> Self {
        Self {
            config,
            min_quality: QualityLevel::Low,
            persona: PersonaAdapter::builtin(),
            synonyms: SynonymTable::builtin(),
            state: Mutex::new(SelectionState {
                catalog,
                history: VecDeque::new(),
            }),
            persistence: None,
        }
    }

    pub fn with_persona(mut self, persona: PersonaAdapter) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_synonyms(mut self, synonyms: SynonymTable) -> Self {
        self.synonyms = synonyms;
        self
    }

    /// Never select assets below `quality`.
    pub fn with_min_quality(mut self, quality: QualityLevel) -> Self {
        self.min_quality = quality;
        self
    }

    /// Restore usage from `state_dir` and persist it there after every pick.
    pub fn with_persistence(mut self, worker: Arc<PersistenceWorker>, state_dir: &Path) -> Self {
        let path = state_dir.join(USAGE_FILE);
        if let Some(usage) = load_json::<BTreeMap<String, UsageRecord>>(&path) {
            let mut state = self.state.lock();
            apply_usage(&mut state.catalog, &usage);
            info!(path = %path.display(), assets = usage.len(), "Restored asset usage");
        }
        self.persistence = Some((worker, path));
        self
    }

    pub fn persona(&self) -> &PersonaAdapter {
        &self.persona
    }

    /// Catalog tags the request for `tag` may draw from, primary first.
    pub fn expand_tags(&self, tag: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for response in self.persona.respond(tag) {
            for concrete in self.synonyms.expand(&response) {
                if !out.contains(&concrete) {
                    out.push(concrete);
                }
            }
        }
        out
    }

    /// Select an asset for `tag`, or from the whole catalog for `None`.
    pub fn select(&self, tag: Option<&str>) -> Option<String> {
        self.select_with_rng(tag, &mut thread_rng(), Utc::now())
    }

    /// Select with an explicit random source and clock.
    pub fn select_with_rng<R: Rng + ?Sized>(
        &self,
        tag: Option<&str>,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let tag = tag
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());

        let mut state = self.state.lock();
        let (pool, primary) = self.candidate_pool(&state.catalog, tag.as_deref());
        if pool.is_empty() {
            debug!(tag = ?tag, "No asset for request");
            return None;
        }

        let pool = exclude_recent(pool, &state.catalog, &state.history);

        let idle = config_secs(self.config.idle_recovery_secs);
        let weights: Vec<f64> = pool
            .iter()
            .map(|&i| {
                let asset = &state.catalog.entries()[i];
                let base = primary
                    .as_deref()
                    .map(|p| asset.weight_for(p))
                    .unwrap_or(1.0)
                    .max(0.0);
                let mut weight = base / (1.0 + asset.usage_count as f64 * self.config.usage_decay);
                let recovered = asset.last_used.map(|t| now - t >= idle).unwrap_or(true);
                if recovered {
                    weight *= self.config.recovery_bonus;
                }
                if self.config.jitter > 0.0 {
                    weight *= rng.gen_range(1.0 - self.config.jitter..=1.0 + self.config.jitter);
                }
                weight.max(0.0)
            })
            .collect();

        let chosen = match WeightedIndex::new(&weights) {
            Ok(dist) => pool[dist.sample(rng)],
            Err(_) => *pool.choose(rng)?,
        };

        let entries = state.catalog.entries_mut();
        entries[chosen].usage_count = entries[chosen].usage_count.saturating_add(1);
        entries[chosen].last_used = Some(now);
        let id = entries[chosen].id.clone();

        let decay = self.config.global_decay_probability.clamp(0.0, 1.0);
        if decay > 0.0 && rng.gen_bool(decay) {
            for asset in entries.iter_mut() {
                asset.usage_count /= 2;
            }
            debug!("Applied global usage decay");
        }

        state.history.push_back(id.clone());
        while state.history.len() > self.config.history_size.max(1) {
            state.history.pop_front();
        }

        debug!(tag = ?tag, asset = %id, pool = pool.len(), "Selected asset");

        if let Some((worker, path)) = &self.persistence {
            worker.submit_json(path.clone(), &usage_snapshot(&state.catalog));
        }
        Some(id)
    }

    /// Indices of eligible candidates, plus the tag whose weights apply.
    fn candidate_pool(&self, catalog: &AssetCatalog, tag: Option<&str>) -> (Vec<usize>, Option<String>) {
        let eligible: Vec<usize> = catalog
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, a)| a.quality >= self.min_quality)
            .map(|(i, _)| i)
            .collect();

        let Some(tag) = tag else {
            return (eligible, None);
        };

        let expanded = self.expand_tags(tag);
        let primary = expanded.first().cloned();
        let by_tag = |tags: &[String]| -> Vec<usize> {
            eligible
                .iter()
                .copied()
                .filter(|&i| catalog.entries()[i].has_any_tag(tags))
                .collect()
        };

        let pool = by_tag(&expanded);
        if !pool.is_empty() {
            return (pool, primary);
        }

        let pool: Vec<usize> = eligible
            .iter()
            .copied()
            .filter(|&i| catalog.entries()[i].id.to_lowercase().contains(tag))
            .collect();
        if !pool.is_empty() {
            debug!(tag = %tag, "Matched assets by id");
            return (pool, primary);
        }

        if is_negative_leaning(tag) {
            let comfort = self.expand_tags(COMFORT_TAG);
            let pool = by_tag(&comfort);
            if !pool.is_empty() {
                debug!(tag = %tag, "Falling back to comfort pool");
                return (pool, Some(COMFORT_TAG.to_string()));
            }
        }

        (Vec::new(), primary)
    }

    /// Absolute path of a selected asset, if the file still exists.
    pub fn resolve(&self, id: &str) -> Option<PathBuf> {
        self.state.lock().catalog.resolve(id)
    }

    /// Every tag with its asset count.
    pub fn tags(&self) -> BTreeMap<String, usize> {
        self.state.lock().catalog.tags()
    }

    pub fn count(&self, tag: &str) -> usize {
        self.state.lock().catalog.count(tag)
    }

    /// Usage of `id`.
    pub fn usage(&self, id: &str) -> Option<UsageRecord> {
        self.state.lock().catalog.get(id).map(|a| UsageRecord {
            usage_count: a.usage_count,
            last_used: a.last_used,
        })
    }

    /// Most recent picks, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Swap in a rescanned catalog, keeping usage of assets that survive.
    pub fn replace_catalog(&self, mut catalog: AssetCatalog) {
        let mut state = self.state.lock();
        let usage = usage_snapshot(&state.catalog);
        apply_usage(&mut catalog, &usage);
        info!(assets = catalog.len(), "Replaced voice catalog");
        state.catalog = catalog;
        state.history.clear();
    }
}

/// Drop recent picks from pools of more than two assets.
///
/// If excluding the whole history would empty the pool, only the most
/// recent pick is excluded.
fn exclude_recent(pool: Vec<usize>, catalog: &AssetCatalog, history: &VecDeque<String>) -> Vec<usize> {
    if pool.len() <= 2 || history.is_empty() {
        return pool;
    }
    let id_of = |i: usize| catalog.entries()[i].id.as_str();
    let fresh: Vec<usize> = pool
        .iter()
        .copied()
        .filter(|&i| !history.iter().any(|h| h == id_of(i)))
        .collect();
    if !fresh.is_empty() {
        return fresh;
    }
    match history.back() {
        Some(last) => pool.into_iter().filter(|&i| id_of(i) != last).collect(),
        None => pool,
    }
}

fn usage_snapshot(catalog: &AssetCatalog) -> BTreeMap<String, UsageRecord> {
    catalog
        .entries()
        .iter()
        .filter(|a| a.usage_count > 0 || a.last_used.is_some())
        .map(|a| {
            (
                a.id.clone(),
                UsageRecord {
                    usage_count: a.usage_count,
                    last_used: a.last_used,
                },
            )
        })
        .collect()
}

fn apply_usage(catalog: &mut AssetCatalog, usage: &BTreeMap<String, UsageRecord>) {
    for asset in catalog.entries_mut() {
        if let Some(record) = usage.get(&asset.id) {
            asset.usage_count = record.usage_count;
            asset.last_used = record.last_used;
        }
    }
}
