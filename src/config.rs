//! User configuration stored as TOML under the platform config directory.

use crate::error::ConfigError;
use crate::llm::{LlmConfig, RetryPolicy, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::types::{ApiKey, Tier};
use crate::vcs::MergeStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const APP_DIR: &str = "commit-pilot";
pub const CONFIG_FILE: &str = "config.toml";
/// Overrides the stored API key.
pub const API_KEY_ENV: &str = "COMMIT_PILOT_API_KEY";

/// Settings read once at startup and passed into the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub tier: Tier,
    pub model: String,
    pub base_url: String,
    pub conventional_commits: bool,
    /// Extra protected branches on top of the built-in list.
    pub protected_branches: Vec<String>,
    pub default_merge_strategy: MergeStrategy,
    pub max_retries: u32,
    pub temperature: f32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            provider: "openai".to_string(),
            api_key: None,
            tier: Tier::Unknown,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            conventional_commits: false,
            protected_branches: Vec::new(),
            default_merge_strategy: MergeStrategy::default(),
            max_retries: crate::llm::retry::DEFAULT_MAX_ATTEMPTS,
            temperature: 0.2,
        }
    }
}

impl Config {
    /// `<config_dir>/commit-pilot/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Loads the default file; a missing file yields defaults.
    pub fn load() -> Result<Config, ConfigError> {
        Config::load_from(&Config::default_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        debug!(path = %path.display(), "loading config");
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Config::default_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Writes the file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    /// The key to use, preferring `override_key` (the environment) over the file.
    pub fn api_key(&self, override_key: Option<&str>) -> Result<ApiKey, ConfigError> {
        let secret = override_key
            .or(self.api_key.as_deref())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        Ok(ApiKey::new(secret, self.provider.clone(), self.tier))
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            retry: RetryPolicy::new(self.max_retries),
            ..LlmConfig::default()
        }
    }

    /// `key = value` lines for display, with the API key redacted.
    pub fn display_lines(&self) -> Vec<(&'static str, String)> {
        let key = match &self.api_key {
            Some(k) => ApiKey::new(k.clone(), self.provider.clone(), self.tier).prefix(),
            None => "(not set)".to_string(),
        };
        vec![
            ("provider", self.provider.clone()),
            ("api_key", key),
            ("tier", self.tier.to_string()),
            ("model", self.model.clone()),
            ("base_url", self.base_url.clone()),
            ("conventional_commits", self.conventional_commits.to_string()),
            ("protected_branches", self.protected_branches.join(", ")),
            ("default_merge_strategy", self.default_merge_strategy.to_string()),
            ("max_retries", self.max_retries.to_string()),
            ("temperature", self.temperature.to_string()),
        ]
    }
}
