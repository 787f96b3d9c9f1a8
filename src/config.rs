//! Layered configuration for flotilla
//!
//! Configuration is read from TOML files in increasing priority order:
//! system (`/etc/flotilla/config.toml`), user (`~/.config/flotilla/config.toml`)
//! and local (`flotilla.toml` in the working directory). A later file only
//! overrides the keys it sets; everything else falls through to the earlier
//! files and finally to the built-in defaults.

mod launcher;
mod monitor;
mod scheduler;

pub use launcher::LauncherConfig;
pub use monitor::MonitorConfig;
pub use scheduler::SchedulerConfig;

use log::debug;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{FlotillaError, Result};

const VALID_LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlotillaConfig {
    /// Log level (off, error, warn, info, debug, trace)
    pub log_level: String,

    /// Phase gating and readiness settings
    pub launcher: LauncherConfig,

    /// Watcher loop and event topic settings
    pub monitor: MonitorConfig,

    /// Scheduler backend settings
    pub scheduler: SchedulerConfig,
}

impl Default for FlotillaConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            launcher: LauncherConfig::default(),
            monitor: MonitorConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Locations searched for configuration files
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub system: PathBuf,
    pub user: Option<PathBuf>,
    pub local: PathBuf,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigPaths {
    pub fn new() -> Self {
        Self {
            system: PathBuf::from("/etc/flotilla/config.toml"),
            user: dirs::config_dir().map(|dir| dir.join("flotilla").join("config.toml")),
            local: PathBuf::from("flotilla.toml"),
        }
    }

    /// Paths that exist on disk, lowest priority first.
    pub fn existing_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.system.clone()];
        if let Some(user) = &self.user {
            paths.push(user.clone());
        }
        paths.push(self.local.clone());
        paths.into_iter().filter(|p| p.exists()).collect()
    }
}

impl FlotillaConfig {
    /// Load from the standard locations, then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with_paths(&ConfigPaths::new())
    }

    pub fn load_with_paths(paths: &ConfigPaths) -> Result<Self> {
        let mut config = Self::load_from_files(&paths.existing_paths())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Merge the given files in order; later files win key by key.
    pub fn load_from_files(files: &[PathBuf]) -> Result<Self> {
        let mut merged = toml::Table::new();
        for file in files {
            debug!("Loading configuration from {}", file.display());
            let table = read_table(file)?;
            merge_tables(&mut merged, table);
        }
        toml::Value::Table(merged)
            .try_into()
            .map_err(|e| FlotillaError::Config(format!("invalid configuration: {}", e)))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("FLOTILLA_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(host) = env::var("FLOTILLA_EVENT_BROKER") {
            self.monitor.event_broker = Some(host);
        }
    }

    /// Check value ranges. Returns every problem found, not just the first.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            errors.push(format!(
                "log_level must be one of {:?}, got '{}'",
                VALID_LOG_LEVELS, self.log_level
            ));
        }
        self.launcher.validate(&mut errors);
        self.monitor.validate(&mut errors);
        self.scheduler.validate(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = fs::read_to_string(path)
        .map_err(|e| FlotillaError::Config(format!("failed to read {}: {}", path.display(), e)))?;
    content
        .parse::<toml::Table>()
        .map_err(|e| FlotillaError::Config(format!("failed to parse {}: {}", path.display(), e)))
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_tables_is_key_by_key() {
        let mut base: toml::Table = "[monitor]\nstatus_topic = \"a\"\nreceive_timeout_secs = 1.0"
            .parse()
            .unwrap();
        let overlay: toml::Table = "[monitor]\nstatus_topic = \"b\"".parse().unwrap();
        merge_tables(&mut base, overlay);

        let monitor = base["monitor"].as_table().unwrap();
        assert_eq!(monitor["status_topic"].as_str(), Some("b"));
        assert_eq!(monitor["receive_timeout_secs"].as_float(), Some(1.0));
    }
}
