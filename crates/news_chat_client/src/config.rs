//! Client config load/save for `~/.news-chat/config.yaml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chat::{ChatOptions, DEFAULT_SAFETY_TIMEOUT};
use crate::error::ConfigError;
use crate::messages::DEFAULT_TOP_K;
use crate::threads::ThreadStore;

/// Environment variable that overrides `stream.ws_url`.
pub const WS_URL_ENV: &str = "NEWS_CHAT_WS_URL";

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";

/// HTTP API section (history, reset, ask).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ApiSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Streaming channel section.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StreamSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
}

/// Turn delivery section.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ChatSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_timeout_ms: Option<u64>,
}

/// Local storage section.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StorageSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub chat: ChatSection,
    #[serde(default)]
    pub storage: StorageSection,
}

impl Config {
    pub fn api_base_url(&self) -> &str {
        self.api.base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL)
    }

    /// Streaming endpoint; `NEWS_CHAT_WS_URL` wins over the file.
    pub fn ws_url(&self) -> String {
        match std::env::var(WS_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => url,
            _ => self
                .stream
                .ws_url
                .clone()
                .unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
        }
    }

    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            top_k: self.chat.top_k.unwrap_or(DEFAULT_TOP_K),
            safety_timeout: self
                .chat
                .safety_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SAFETY_TIMEOUT),
            ..ChatOptions::default()
        }
    }

    /// Thread registry file: configured path, else next to the default config.
    pub fn threads_path(&self) -> Option<PathBuf> {
        self.storage
            .threads_path
            .clone()
            .or_else(|| default_data_dir().map(|dir| ThreadStore::path_in(&dir)))
    }
}

/// `~/.news-chat` (platform-specific home).
pub fn default_data_dir() -> Option<PathBuf> {
    Some(home_dir()?.join(".news-chat"))
}

/// Returns the default config file path: `~/.news-chat/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    Some(default_data_dir()?.join("config.yaml"))
}

#[cfg(unix)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(windows)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE").map(PathBuf::from)
}

#[cfg(not(any(unix, windows)))]
fn home_dir() -> Option<PathBuf> {
    None
}

/// Load config from a YAML file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Load config, treating a missing file as the default config.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    load(path)
}

/// Save config to a YAML file. Creates parent directory if missing.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}
