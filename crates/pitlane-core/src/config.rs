//! Operator configuration.
//!
//! Stored as JSON at `<config_dir>/pitlane/config.json`. Values from
//! `PITLANE_*` environment variables (and a `.env` file, loaded by the
//! binary) override what is on disk without being written back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::capacity::{CapacityPolicy, InstructorPolicy, DEFAULT_MAX_MEMBERS_PER_RESOURCE};
use crate::history::DEFAULT_HISTORY_LIMIT;
use crate::models::DEFAULT_SOURCE;

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "pitlane";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Where entities and history live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// JSON snapshot in the data directory.
    #[default]
    File,
    Firestore,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Backend::File),
            "firestore" => Ok(Backend::Firestore),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    pub firebase_project: Option<String>,
    pub firebase_api_key: Option<String>,
    /// Firestore emulator base URL, e.g. `http://localhost:8080/v1`.
    pub firestore_url: Option<String>,
    /// Overrides the platform data directory.
    pub data_dir: Option<PathBuf>,
    pub max_members_per_resource: usize,
    pub instructor_policy: InstructorPolicy,
    pub history_limit: usize,
    pub source: String,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            firebase_project: None,
            firebase_api_key: None,
            firestore_url: None,
            data_dir: None,
            max_members_per_resource: DEFAULT_MAX_MEMBERS_PER_RESOURCE,
            instructor_policy: InstructorPolicy::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            source: DEFAULT_SOURCE.to_string(),
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Apply `PITLANE_*` overrides; `lookup` is usually `std::env::var(..).ok()`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("PITLANE_BACKEND") {
            self.backend = value.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(value) = lookup("PITLANE_FIREBASE_PROJECT") {
            self.firebase_project = Some(value);
        }
        if let Some(value) = lookup("PITLANE_FIREBASE_API_KEY") {
            self.firebase_api_key = Some(value);
        }
        if let Some(value) = lookup("PITLANE_FIRESTORE_URL") {
            self.firestore_url = Some(value);
        }
        if let Some(value) = lookup("PITLANE_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("PITLANE_MAX_PER_VEHICLE") {
            self.max_members_per_resource = value
                .parse()
                .with_context(|| format!("PITLANE_MAX_PER_VEHICLE is not a number: {}", value))?;
        }
        if let Some(value) = lookup("PITLANE_INSTRUCTOR_POLICY") {
            self.instructor_policy = value.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(value) = lookup("PITLANE_SOURCE") {
            self.source = value;
        }
        Ok(())
    }

    pub fn capacity_policy(&self) -> CapacityPolicy {
        CapacityPolicy {
            max_members_per_resource: self.max_members_per_resource.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.capacity_policy().max_members_per_resource, 1);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            backend: Backend::Firestore,
            firebase_project: Some("race-day".to_string()),
            last_email: Some("coach@example.org".to_string()),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "backend": "firestore", "instructor_policy": "multi-group" }"#).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.backend, Backend::Firestore);
        assert_eq!(config.instructor_policy, InstructorPolicy::MultiGroup);
        assert_eq!(config.source, "pitlane");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PITLANE_BACKEND", "Firestore"),
            ("PITLANE_FIREBASE_PROJECT", "race-day"),
            ("PITLANE_DATA_DIR", "/tmp/pitlane"),
            ("PITLANE_MAX_PER_VEHICLE", "2"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.backend, Backend::Firestore);
        assert_eq!(config.firebase_project.as_deref(), Some("race-day"));
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/pitlane"));
        assert_eq!(config.capacity_policy().max_members_per_resource, 2);
    }

    #[test]
    fn test_bad_override_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == "PITLANE_BACKEND").then(|| "sqlite".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("Unknown backend"));
    }
}
