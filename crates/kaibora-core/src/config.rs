//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the origin the app shell is served from, the cache generation name, the
//! bootstrap asset list and the registration endpoint.
//!
//! Configuration is stored at `~/.config/kaibora/config.json`. Every field
//! has a default, so a missing or partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::api::client::REQUEST_TIMEOUT_SECS;
use crate::cache::manager::{API_PATTERN, BOOTSTRAP_ASSETS, CACHE_NAME, DEFAULT_ORIGIN};
use crate::cache::CacheSettings;
use crate::registration::client::DEFAULT_REGISTRATION_URL;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "kaibora";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub origin: String,
    pub cache_name: String,
    pub bootstrap_assets: Vec<String>,
    pub api_pattern: String,
    pub registration_url: String,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            cache_name: CACHE_NAME.to_string(),
            bootstrap_assets: BOOTSTRAP_ASSETS.iter().map(|s| s.to_string()).collect(),
            api_pattern: API_PATTERN.to_string(),
            registration_url: DEFAULT_REGISTRATION_URL.to_string(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Root of the named cache stores.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join("caches"))
    }

    /// Where page-local data (the adventurer name) is kept.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn origin_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.origin)
            .with_context(|| format!("Invalid origin URL: {}", self.origin))?;
        // Relative assets resolve against the origin's directory
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub fn registration_endpoint(&self) -> Result<Url> {
        Url::parse(&self.registration_url)
            .with_context(|| format!("Invalid registration URL: {}", self.registration_url))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_settings(&self) -> Result<CacheSettings> {
        Ok(CacheSettings {
            cache_name: self.cache_name.clone(),
            origin: self.origin_url()?,
            bootstrap_assets: self.bootstrap_assets.clone(),
            api_pattern: self.api_pattern.clone(),
        })
    }
}
