//! Voice asset catalog.
//!
//! Assets are identified by their path relative to the voice directory.
//! The catalog is read from `index.json` when present; otherwise the
//! directory is scanned and tags are derived from file and folder names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{EchoError, EchoResult};
use crate::persistence::{load_json, PersistenceWorker};

/// Name of the catalog index inside the voice directory.
pub const INDEX_FILE: &str = "index.json";
/// Recognised audio extensions.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg"];

const HIGH_QUALITY_BYTES: u64 = 1024 * 1024;
const MEDIUM_QUALITY_BYTES: u64 = 512 * 1024;

/// Coarse quality class derived from file size.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum QualityLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl QualityLevel {
    pub fn from_size(bytes: u64) -> Self {
        if bytes > HIGH_QUALITY_BYTES {
            Self::High
        } else if bytes > MEDIUM_QUALITY_BYTES {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// One selectable asset with its mutable usage state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub id: String,
    pub tags: BTreeSet<String>,
    /// Base weight per tag; tags without an entry weigh 1.0.
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub quality: QualityLevel,
}

impl AssetEntry {
    /// Create an entry. Tags are lower-cased.
    pub fn new<I, S>(id: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            id: id.into(),
            tags: tags.into_iter().map(|t| t.as_ref().to_lowercase()).collect(),
            weights: HashMap::new(),
            usage_count: 0,
            last_used: None,
            size: 0,
            quality: QualityLevel::Low,
        }
    }

    pub fn with_weight(mut self, tag: &str, weight: f64) -> Self {
        self.weights.insert(tag.to_lowercase(), weight);
        self
    }

    pub fn with_quality(mut self, quality: QualityLevel) -> Self {
        self.quality = quality;
        self
    }

    /// Base weight for `tag`.
    pub fn weight_for(&self, tag: &str) -> f64 {
        self.weights.get(tag).copied().unwrap_or(1.0)
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }
}

/// On-disk record of `index.json`, keyed by relative path.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    path: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    weights: HashMap<String, f64>,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    quality: QualityLevel,
}

impl From<&AssetEntry> for IndexRecord {
    fn from(entry: &AssetEntry) -> Self {
        let filename = Path::new(&entry.id)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path: entry.id.clone(),
            filename,
            tags: entry.tags.iter().cloned().collect(),
            weights: entry.weights.clone(),
            size: entry.size,
            quality: entry.quality,
        }
    }
}

impl From<IndexRecord> for AssetEntry {
    fn from(record: IndexRecord) -> Self {
        let mut entry = AssetEntry::new(record.path, &record.tags);
        entry.weights = record
            .weights
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        entry.size = record.size;
        entry.quality = record.quality;
        entry
    }
}

/// Whether `id` is a relative path that stays under the catalog root.
fn is_contained(id: &str) -> bool {
    !id.is_empty()
        && Path::new(id)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Derive tags from `<name>_<tag>_<seq>` and the parent directory.
pub fn derive_tags(relative: &Path) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    if let Some(stem) = relative.file_stem().and_then(|s| s.to_str()) {
        let mut parts: Vec<&str> = stem.split('_').filter(|p| !p.is_empty()).collect();
        if parts.len() >= 2 && parts.last().is_some_and(|p| p.chars().all(|c| c.is_ascii_digit())) {
            parts.pop();
        }
        if parts.len() >= 2 {
            if let Some(tag) = parts.last() {
                tags.insert(tag.to_lowercase());
            }
        }
    }
    if let Some(parent) = relative.parent().and_then(|p| p.file_name()).and_then(|p| p.to_str()) {
        tags.insert(parent.to_lowercase());
    }
    tags
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// The set of assets under one voice directory.
#[derive(Debug, Clone, Default)]
pub struct AssetCatalog {
    root: PathBuf,
    assets: Vec<AssetEntry>,
}

impl AssetCatalog {
    /// Catalog over explicit entries.
    pub fn from_entries(root: impl Into<PathBuf>, assets: Vec<AssetEntry>) -> Self {
        Self {
            root: root.into(),
            assets,
        }
    }

    /// Load the catalog of `dir`, preferring its index file.
    ///
    /// A corrupt index is ignored and the directory rescanned. A missing
    /// directory is an error.
    pub fn load(dir: impl AsRef<Path>) -> EchoResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(EchoError::missing_directory(dir));
        }

        let index_path = dir.join(INDEX_FILE);
        if let Some(index) = load_json::<BTreeMap<String, IndexRecord>>(&index_path) {
            let (assets, escaping): (Vec<AssetEntry>, Vec<AssetEntry>) = index
                .into_values()
                .map(AssetEntry::from)
                .partition(|asset| is_contained(&asset.id));
            for asset in &escaping {
                let err = EchoError::catalog(format!("Index entry '{}' points outside {}", asset.id, dir.display()));
                warn!(error = %err, code = err.code().as_str(), "Skipping voice index entry");
            }
            info!(dir = %dir.display(), assets = assets.len(), "Loaded voice index");
            return Ok(Self::from_entries(dir, assets));
        }
        if index_path.exists() {
            let err = EchoError::catalog(format!("Unreadable voice index {}", index_path.display()));
            warn!(
                error = %err,
                code = err.code().as_str(),
                hint = err.suggestion().unwrap_or_default(),
                "Rescanning voice directory"
            );
        }

        Self::scan(dir)
    }

    /// Scan `dir` for audio files, ignoring any index.
    pub fn scan(dir: impl AsRef<Path>) -> EchoResult<Self> {
        let dir = dir.as_ref();
        let mut assets = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable voice entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_audio(entry.path()) {
                continue;
            }
            let Some(id) = relative_id(dir, entry.path()) else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let relative = Path::new(&id);
            let mut asset = AssetEntry::new(id.clone(), derive_tags(relative));
            asset.size = size;
            asset.quality = QualityLevel::from_size(size);
            debug!(id = %asset.id, tags = ?asset.tags, quality = %asset.quality, "Indexed voice");
            assets.push(asset);
        }
        info!(dir = %dir.display(), assets = assets.len(), "Scanned voice directory");
        Ok(Self::from_entries(dir, assets))
    }

    /// Queue the index file for writing.
    pub fn persist_index(&self, worker: &PersistenceWorker) -> bool {
        let index: BTreeMap<String, IndexRecord> = self
            .assets
            .iter()
            .map(|a| (a.id.clone(), IndexRecord::from(a)))
            .collect();
        worker.submit_json(self.root.join(INDEX_FILE), &index)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> &[AssetEntry] {
        &self.assets
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [AssetEntry] {
        &mut self.assets
    }

    pub fn get(&self, id: &str) -> Option<&AssetEntry> {
        self.assets.iter().find(|a| a.id == id)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Absolute path of `id` if the file still exists.
    pub fn resolve(&self, id: &str) -> Option<PathBuf> {
        if !is_contained(id) {
            warn!(id = %id, "Refusing voice id outside the voice directory");
            return None;
        }
        let path = self.root.join(id);
        if path.is_file() {
            Some(path)
        } else {
            warn!(id = %id, path = %path.display(), "Voice file missing");
            None
        }
    }

    /// Every tag with its asset count.
    pub fn tags(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for asset in &self.assets {
            for tag in &asset.tags {
                *counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Number of assets carrying `tag`, or all assets for an empty tag.
    pub fn count(&self, tag: &str) -> usize {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() {
            return self.assets.len();
        }
        self.assets.iter().filter(|a| a.tags.contains(&tag)).count()
    }
}
