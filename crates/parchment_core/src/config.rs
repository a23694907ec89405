//! Configuration (§1.1 ambient stack, §6 "Environment"): resolving the
//! notes root `R` and the instance id, the two pieces of injected,
//! non-global state the spec calls out.
//!
//! The instance id is generated once per installation and persisted
//! alongside the rest of the config, mirroring the teacher's
//! `dirs`-based config directory resolution and TOML persistence.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Persisted settings for one application installation: where the notes
/// live, and the stable writer id this installation uses when producing
/// update files (§3 "Writer identity").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Notes root `R` (§6).
    pub notes_root: PathBuf,
    /// This installation's instance id, chosen once and never changed.
    pub instance_id: String,
}

impl Config {
    /// Build a config with a freshly generated instance id.
    pub fn new(notes_root: PathBuf) -> Self {
        Config {
            notes_root,
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Default config path: `<config dir>/parchment/config.toml`.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("parchment").join("config.toml"))
    }

    /// Default notes root: `<data dir>/parchment/notes`.
    fn default_notes_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parchment")
            .join("notes")
    }

    /// Load config from the default location, generating and persisting a
    /// fresh instance id on first run. Never fails outright — a missing or
    /// corrupt config file is treated the same way a missing meta file is
    /// in the store (§4.5): fall back and start fresh, logging a warning
    /// for corruption specifically.
    pub fn load_or_init() -> Result<Self> {
        let Some(path) = Self::config_path() else {
            return Ok(Config::new(Self::default_notes_root()));
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => Ok(config),
                Err(err) => {
                    log::warn!("corrupt config at {}: {err}, regenerating", path.display());
                    let config = Config::new(Self::default_notes_root());
                    config.save()?;
                    Ok(config)
                }
            },
            Err(_) => {
                let config = Config::new(Self::default_notes_root());
                config.save()?;
                Ok(config)
            }
        }
    }

    /// Persist this config to the default location.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or_else(|| {
            StoreError::Crdt("could not determine a config directory for this platform".to_string())
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|err| StoreError::Crdt(format!("failed to serialize config: {err}")))?;
        std::fs::write(&path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_gets_a_distinct_instance_id_each_time() {
        let a = Config::new(PathBuf::from("/tmp/a"));
        let b = Config::new(PathBuf::from("/tmp/b"));
        assert_ne!(a.instance_id, b.instance_id);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::new(PathBuf::from("/tmp/notes"));
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.instance_id, config.instance_id);
        assert_eq!(parsed.notes_root, config.notes_root);
    }
}
