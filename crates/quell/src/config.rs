//! CLI configuration.
//!
//! One TOML file (`quell.toml` by default) holding the paths this
//! installation works against plus the schedule settings. A missing file
//! yields defaults so `quell` works out of the box in the current
//! directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Weekday;
use quell_core::logging::LogConfig;
use serde::{Deserialize, Serialize};

/// Top-level CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuellConfig {
    /// JSON document of configuration groups (the host's data).
    pub groups_file: PathBuf,

    /// Primary backend database. Rides the host's own sync in a real
    /// deployment, so captured originals follow the data across devices.
    pub primary_db: PathBuf,

    /// Backup backend JSON map. Local-only, lower trust.
    pub backup_file: PathBuf,

    /// Persisted pass-to-pass state (mode hint and zero watch).
    pub state_file: PathBuf,

    /// Weekday names on which the override should be active.
    pub pause_days: Vec<String>,

    /// Force override regardless of weekday.
    pub travel_mode: bool,

    /// Logging settings.
    pub log: LogConfig,
}

impl Default for QuellConfig {
    fn default() -> Self {
        Self {
            groups_file: PathBuf::from("groups.json"),
            primary_db: PathBuf::from("quell.db"),
            backup_file: PathBuf::from("quell-backup.json"),
            state_file: PathBuf::from("quell-state.json"),
            pause_days: vec!["saturday".to_string(), "sunday".to_string()],
            travel_mode: false,
            log: LogConfig::default(),
        }
    }
}

impl QuellConfig {
    /// Load configuration from `path`, or defaults when the file does not
    /// exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Write configuration back to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).context("serializing config")?;
        std::fs::write(path, text).with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    /// Parse the configured pause-day names.
    pub fn pause_weekdays(&self) -> Result<Vec<Weekday>> {
        let mut days = Vec::with_capacity(self.pause_days.len());
        for name in &self.pause_days {
            let Ok(day) = name.parse::<Weekday>() else {
                bail!("invalid pause day in config: {name:?}");
            };
            days.push(day);
        }
        Ok(days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = QuellConfig::load(Path::new("/nonexistent/quell.toml")).unwrap();
        assert_eq!(config.pause_days, vec!["saturday", "sunday"]);
        assert!(!config.travel_mode);
    }

    #[test]
    fn pause_days_parse_case_insensitively() {
        let config = QuellConfig {
            pause_days: vec!["Saturday".to_string(), "sun".to_string()],
            ..Default::default()
        };
        let days = config.pause_weekdays().unwrap();
        assert_eq!(days, vec![chrono::Weekday::Sat, chrono::Weekday::Sun]);
    }

    #[test]
    fn bad_pause_day_is_an_error() {
        let config = QuellConfig {
            pause_days: vec!["caturday".to_string()],
            ..Default::default()
        };
        assert!(config.pause_weekdays().is_err());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quell.toml");
        let mut config = QuellConfig::default();
        config.travel_mode = true;
        config.save(&path).unwrap();

        let loaded = QuellConfig::load(&path).unwrap();
        assert!(loaded.travel_mode);
        assert_eq!(loaded.groups_file, config.groups_file);
    }
}
