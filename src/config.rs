//! Configuration file handling for ugc-forge.
//!
//! Loads configuration from `~/.config/ugc-forge/config.toml` or a custom
//! path. Settings merge as CLI > environment > config file > defaults.
//!
//! The API key is deliberately never bundled: it must come from the
//! `KIE_API_KEY` environment variable (a `.env` file works) or the config
//! file, or submission is refused with a clear message.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::kie::KIE_API_KEY_ENV;
use crate::session::SessionConfig;

/// Configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct ApiConfig {
    /// API key; the `KIE_API_KEY` environment variable takes precedence.
    pub key: Option<String>,
    /// Override the API base URL (mainly for testing).
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct GenerationConfig {
    /// Default quality mode: "std" or "pro".
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PollingConfig {
    pub interval_secs: Option<u64>,
    pub deadline_secs: Option<u64>,
}

impl Config {
    /// Load configuration from a file path.
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;
            let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                source: e,
            })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Resolve the API key: environment first, then config file.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(KIE_API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.api.key.clone().filter(|k| !k.is_empty()))
    }

    /// Polling policy from the file, with the 5 s / 300 s defaults.
    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            poll_interval: self
                .polling
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            deadline: self
                .polling
                .deadline_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.deadline),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("ugc-forge")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/config.toml"))).unwrap();
        assert!(config.api.key.is_none());
        assert!(config.generation.mode.is_none());
        let session = config.session_config();
        assert_eq!(session.poll_interval, Duration::from_secs(5));
        assert_eq!(session.deadline, Duration::from_secs(300));
    }

    #[test]
    fn parses_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[api]\nkey = \"file-key\"\nbase_url = \"http://localhost:9\"\n\n\
             [generation]\nmode = \"std\"\n\n\
             [polling]\ninterval_secs = 2\ndeadline_secs = 60\n"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.api.key.as_deref(), Some("file-key"));
        assert_eq!(config.api.base_url.as_deref(), Some("http://localhost:9"));
        assert_eq!(config.generation.mode.as_deref(), Some("std"));

        let session = config.session_config();
        assert_eq!(session.poll_interval, Duration::from_secs(2));
        assert_eq!(session.deadline, Duration::from_secs(60));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api\nkey =").unwrap();

        let result = Config::load(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn default_path_ends_with_crate_config() {
        let path = default_path();
        assert!(path.ends_with("ugc-forge/config.toml"));
    }
}
