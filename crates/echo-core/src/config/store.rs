//! Config store collaborator: snapshot, mutate, save.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{ConfigFormat, EchoConfig};
use crate::error::{EchoError, EchoResult, ErrorCode};

/// Source of the live configuration.
///
/// Components never cache the record across iterations; they call
/// `snapshot()` when they need it, which is how edits are hot-reloaded.
pub trait ConfigStore: Send + Sync {
    /// Clone of the current configuration.
    fn snapshot(&self) -> EchoConfig;

    /// Mutate the configuration in memory. Call `save()` to persist.
    fn update(&self, f: &mut dyn FnMut(&mut EchoConfig));

    /// Persist the current configuration.
    fn save(&self) -> EchoResult<()>;
}

/// Configuration held only in memory. `save()` is a no-op.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    config: RwLock<EchoConfig>,
}

impl InMemoryConfigStore {
    pub fn new(config: EchoConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn snapshot(&self) -> EchoConfig {
        self.config.read().clone()
    }

    fn update(&self, f: &mut dyn FnMut(&mut EchoConfig)) {
        f(&mut self.config.write());
    }

    fn save(&self) -> EchoResult<()> {
        Ok(())
    }
}

/// Configuration backed by a TOML, JSON or YAML file.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    format: ConfigFormat,
    config: RwLock<EchoConfig>,
}

impl FileConfigStore {
    /// Open the store at `path`.
    ///
    /// A missing file is created from defaults. A file that fails to parse is
    /// reported and replaced in memory by defaults; it is not overwritten until
    /// the next explicit `save()`.
    pub fn open(path: impl Into<PathBuf>) -> EchoResult<Self> {
        let path = path.into();
        let format = ConfigFormat::from_path(&path)?;

        let config = if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(EchoError::from)
                .and_then(|content| format.parse(&content))
            {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        hint = e.suggestion().unwrap_or_default(),
                        "Failed to load configuration, using defaults"
                    );
                    EchoConfig::default()
                }
            }
        } else {
            info!(path = %path.display(), "No configuration file, writing defaults");
            let config = EchoConfig::default();
            if let Err(e) = write_config(&path, format, &config) {
                warn!(path = %path.display(), error = %e, "Failed to write default configuration");
            }
            config
        };

        Ok(Self {
            path,
            format,
            config: RwLock::new(config),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_config(path: &Path, format: ConfigFormat, config: &EchoConfig) -> EchoResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = format.render(config)?;
    std::fs::write(path, rendered).map_err(|e| EchoError::Configuration {
        message: format!("Failed to save {}: {}", path.display(), e),
        code: ErrorCode::CfgSaveFailed,
    })
}

impl ConfigStore for FileConfigStore {
    fn snapshot(&self) -> EchoConfig {
        self.config.read().clone()
    }

    fn update(&self, f: &mut dyn FnMut(&mut EchoConfig)) {
        f(&mut self.config.write());
    }

    fn save(&self) -> EchoResult<()> {
        let config = self.snapshot();
        write_config(&self.path, self.format, &config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_update() {
        let store = InMemoryConfigStore::new(EchoConfig::default());
        store.update(&mut |c| c.schedule.tags.push("morning".to_string()));
        assert_eq!(store.snapshot().schedule.tags, vec!["morning"]);
        assert!(store.save().is_ok());
    }

    #[test]
    fn test_file_store_creates_defaults_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("echo.toml");

        let store = FileConfigStore::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.snapshot().enabled);

        store.update(&mut |c| {
            c.schedule.enabled = true;
            c.schedule.target_sessions.push("qq:100".to_string());
        });
        store.save().unwrap();

        let reopened = FileConfigStore::open(&path).unwrap();
        let config = reopened.snapshot();
        assert!(config.schedule.enabled);
        assert_eq!(config.schedule.target_sessions, vec!["qq:100"]);
    }

    #[test]
    fn test_file_store_corrupt_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echo.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileConfigStore::open(&path).unwrap();
        assert_eq!(store.snapshot(), EchoConfig::default());
        // Corrupt file left untouched until an explicit save
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
