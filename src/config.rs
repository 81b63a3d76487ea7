//! Queue engine configuration
//!
//! Loaded from a YAML file; every field has a default so a missing or partial
//! file still yields a usable config. Secrets live in a `.env` file next to it.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "episode-queue";
pub const API_TOKEN_KEY: &str = "QUEUE_API_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub database_path: PathBuf,
    pub download_dir: PathBuf,
    pub directory_url: String,
    pub user_id: Option<String>,
    /// How often the active item's position is sampled.
    pub position_poll_ms: u64,
    pub request_timeout_secs: u64,
    /// Drop an episode from the queue once it plays to the end.
    pub remove_on_finish: bool,
    pub notify_new_episodes: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self {
            database_path: base.join("queue.db"),
            download_dir: base.join("Podcast_Downloads"),
            directory_url: "http://localhost:8080/api/v1".to_string(),
            user_id: None,
            position_poll_ms: 1000,
            request_timeout_secs: 30,
            remove_on_finish: false,
            notify_new_episodes: true,
        }
    }
}

impl QueueConfig {
    /// Read the config at `path`, falling back to defaults when the file does
    /// not exist. A file that exists but does not parse is an error.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        let config: QueueConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.position_poll_ms == 0 {
            return Err(AppError::Config("position_poll_ms must be greater than 0".into()));
        }
        if self.directory_url.trim().is_empty() {
            return Err(AppError::Config("directory_url is empty".into()));
        }
        Ok(())
    }

    pub fn position_poll_interval(&self) -> Duration {
        Duration::from_millis(self.position_poll_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Load a value from the .env file in `dir` by key name
pub fn load_env_value(dir: &Path, key: &str) -> Option<String> {
    let env_path = dir.join(".env");
    let prefix = format!("{}=", key);
    let content = std::fs::read_to_string(&env_path).ok()?;
    content.lines().find_map(|line| {
        let value = line.trim().strip_prefix(&prefix)?;
        let value = value.trim().trim_matches('"').trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = QueueConfig::load(&temp.path().join("nope.yaml")).unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.position_poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "remove_on_finish: true\nuser_id: listener-7\n").unwrap();

        let config = QueueConfig::load(&path).unwrap();
        assert!(config.remove_on_finish);
        assert_eq!(config.user_id.as_deref(), Some("listener-7"));
        assert_eq!(config.position_poll_ms, 1000);
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "position_poll_ms: 0\n").unwrap();
        assert!(matches!(QueueConfig::load(&path), Err(AppError::Config(_))));
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "position_poll_ms: [not, a, number\n").unwrap();
        assert!(QueueConfig::load(&path).is_err());
    }

    #[test]
    fn test_env_value_strips_quotes() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".env"),
            "OTHER=1\nQUEUE_API_TOKEN=\"abc123\"\nEMPTY=\n",
        )
        .unwrap();
        assert_eq!(load_env_value(temp.path(), API_TOKEN_KEY), Some("abc123".to_string()));
        assert_eq!(load_env_value(temp.path(), "EMPTY"), None);
        assert_eq!(load_env_value(temp.path(), "MISSING"), None);
    }
}
