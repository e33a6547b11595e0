use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.sensenova.cn";
pub const DEFAULT_CHAT_MODEL: &str = "SkyChat-MegaVerse";
pub const DEFAULT_IMAGE_MODEL: &str = "cogview-3";

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "TIANGONG_API_KEY";

const DEFAULT_CONFIG_PATHS: [&str; 3] = ["./tiangong.toml", "~/.config/tiangong/config.toml", "~/.tiangong.toml"];

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub chat: ChatConfig,
    pub image: ImageConfig,
    pub retry: RetryConfig,
}

/// Settings shared by the chat and image endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub enabled: bool,
    /// Overrides `connection.base_url` when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Overrides `connection.api_key` when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub options: ChatOptionsConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            api_key: None,
            options: ChatOptionsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatOptionsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub do_sample: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Default for ChatOptionsConfig {
    fn default() -> Self {
        Self {
            model: Some(DEFAULT_CHAT_MODEL.to_string()),
            max_tokens: Some(1024),
            do_sample: Some(true),
            temperature: Some(0.95),
            top_p: Some(0.7),
            stop: None,
            user: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub options: ImageOptionsConfig,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            api_key: None,
            options: ImageOptionsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageOptionsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl Default for ImageOptionsConfig {
    fn default() -> Self {
        Self {
            model: Some(DEFAULT_IMAGE_MODEL.to_string()),
            user: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10000,
        }
    }
}

/// Endpoint and credentials resolved for one client.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConnection {
    pub base_url: String,
    pub api_key: String,
}

impl Config {
    /// Load from `config_path`, or from the first default location that
    /// exists. Falls back to defaults when there is no file at all.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path_to_load = match config_path {
            Some(path) => {
                let expanded = shellexpand::tilde(path).to_string();
                if !Path::new(&expanded).exists() {
                    bail!("Configuration file not found: {}", expanded);
                }
                Some(expanded)
            }
            None => DEFAULT_CONFIG_PATHS.iter().find_map(|path| {
                let expanded_path = shellexpand::tilde(path);
                if Path::new(expanded_path.as_ref()).exists() {
                    Some(expanded_path.to_string())
                } else {
                    None
                }
            }),
        };

        let mut config = match path_to_load {
            Some(path) => {
                debug!("Loading configuration from {}", path);
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read configuration file {}", path))?;
                Self::parse(&content).with_context(|| format!("Invalid configuration file {}", path))?
            }
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Default location for a user-wide configuration file.
    pub fn default_user_path() -> Option<std::path::PathBuf> {
        dirs::home_dir().map(|mut path| {
            path.push(".config");
            path.push("tiangong");
            path.push("config.toml");
            path
        })
    }

    /// Fill the connection API key from the environment when the file leaves
    /// it empty.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if non_empty(&self.connection.api_key).is_none() {
            if let Some(key) = lookup(API_KEY_ENV).filter(|k| !k.trim().is_empty()) {
                debug!("Using API key from {}", API_KEY_ENV);
                self.connection.api_key = Some(key);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            bail!(
                "retry.base_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                self.retry.base_delay_ms,
                self.retry.max_delay_ms
            );
        }
        if let Some(temperature) = self.chat.options.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                bail!("chat.options.temperature must be between 0.0 and 2.0, got {}", temperature);
            }
        }
        if let Some(top_p) = self.chat.options.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                bail!("chat.options.top_p must be between 0.0 and 1.0, got {}", top_p);
            }
        }
        Ok(())
    }

    pub fn chat_connection(&self) -> Result<ResolvedConnection> {
        if !self.chat.enabled {
            bail!("Chat is disabled in the configuration");
        }
        self.resolve("chat", &self.chat.base_url, &self.chat.api_key)
    }

    pub fn image_connection(&self) -> Result<ResolvedConnection> {
        if !self.image.enabled {
            bail!("Image generation is disabled in the configuration");
        }
        self.resolve("image", &self.image.base_url, &self.image.api_key)
    }

    fn resolve(&self, section: &str, base_url: &Option<String>, api_key: &Option<String>) -> Result<ResolvedConnection> {
        let base_url = non_empty(base_url)
            .or_else(|| Some(self.connection.base_url.as_str()).filter(|u| !u.trim().is_empty()));
        let Some(base_url) = base_url else {
            bail!("No base URL configured for {}. Set connection.base_url or {}.base_url", section, section);
        };
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            bail!("Invalid base URL for {}: '{}'", section, base_url);
        }

        let Some(api_key) = non_empty(api_key).or_else(|| non_empty(&self.connection.api_key)) else {
            bail!(
                "No API key configured for {}. Set connection.api_key, {}.api_key or the {} environment variable",
                section,
                section,
                API_KEY_ENV
            );
        };

        Ok(ResolvedConnection {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests;
