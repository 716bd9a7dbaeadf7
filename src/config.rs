//! TOML configuration.
//!
//! Stored under the platform config directory; every field has a default so
//! a missing or partial file never blocks startup.

use crate::cache::DEFAULT_BUDGET_BYTES;
use crate::platform::ApplyTarget;
use crate::prefs::SelectionMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mode: SelectionMode,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub apply_target: ApplyTarget,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub setter: SetterConfig,
}

/// How often the wallpaper rotates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// One of "never", "15m", "hourly", "daily".
    pub interval: String,
    /// Local wall-clock time for daily rotation, "HH:MM".
    pub daily_time: String,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            interval: "hourly".into(),
            daily_time: "09:00".into(),
        }
    }
}

/// Which catalog sources contribute wallpapers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub github: bool,
    pub bing: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            github: true,
            bing: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub manifest_url: String,
    /// Unix seconds of the last successful catalog sync.
    #[serde(default)]
    pub last_sync_ts: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            manifest_url: "https://cdn.driftwall.io/manifest/v1/manifest.json".into(),
            last_sync_ts: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub budget_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_BUDGET_BYTES,
        }
    }
}

/// External apply command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetterConfig {
    pub command: String,
}

impl Default for SetterConfig {
    fn default() -> Self {
        Self {
            command: "swww img".into(),
        }
    }
}

impl Config {
    fn config_path(data_dir: &Path) -> PathBuf {
        data_dir.join("config.toml")
    }

    /// Platform data directory, overridable for tests and scripting.
    pub fn default_data_dir() -> PathBuf {
        directories::ProjectDirs::from("io", "driftwall", "driftwall")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("/tmp/driftwall"))
    }

    pub fn load(data_dir: &Path) -> Result<Self> {
        let path = Self::config_path(data_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        fs::create_dir_all(data_dir)?;
        let path = Self::config_path(data_dir);
        let raw = toml::to_string_pretty(self)?;
        fs::write(&path, raw).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn cache_dir(data_dir: &Path) -> PathBuf {
        data_dir.join("cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.rotation.interval, "hourly");
        assert_eq!(config.rotation.daily_time, "09:00");
        assert_eq!(config.cache.budget_bytes, DEFAULT_BUDGET_BYTES);
        assert!(config.sources.github && config.sources.bing);
        assert_eq!(config.mode, SelectionMode::Auto);
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.rotation.interval = "daily".into();
        config.rotation.daily_time = "21:30".into();
        config.sync.last_sync_ts = 12345;
        config.mode = SelectionMode::Personalized;
        config.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.rotation.interval, "daily");
        assert_eq!(loaded.rotation.daily_time, "21:30");
        assert_eq!(loaded.sync.last_sync_ts, 12345);
        assert_eq!(loaded.mode, SelectionMode::Personalized);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.toml"),
            "[rotation]\ninterval = \"15m\"\ndaily_time = \"08:00\"\n",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.rotation.interval, "15m");
        assert_eq!(config.cache.budget_bytes, DEFAULT_BUDGET_BYTES);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.toml"), "rotation = [[[").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}
