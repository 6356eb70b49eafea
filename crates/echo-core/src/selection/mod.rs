//! Turning a tag into one concrete voice asset.
//!
//! A request tag is expanded through the [`PersonaAdapter`] and the
//! [`SynonymTable`], matched against the [`AssetCatalog`], and drawn by the
//! [`ResourceSelector`] with usage-aware weights.

mod catalog;
mod persona;
mod selector;

pub use catalog::{derive_tags, AssetCatalog, AssetEntry, QualityLevel, AUDIO_EXTENSIONS, INDEX_FILE};
pub use persona::{is_negative_leaning, PersonaAdapter, SynonymTable, COMFORT_TAG, NEGATIVE_LEANING};
pub use selector::{ResourceSelector, SelectorConfig, UsageRecord, USAGE_FILE};
