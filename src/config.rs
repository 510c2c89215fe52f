//! Application configuration: provider, models, timeouts, compression and
//! storage settings from `config.toml`, API key from the OS keychain.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analyzer::image_prep::CompressionOptions;
use crate::error::WeldMasterError;

const APP_DIR: &str = "weldmaster";
const KEYRING_USER: &str = "weldmaster";
/// Environment variable consulted when the keychain has no API key.
pub const API_KEY_ENV: &str = "WELDMASTER_API_KEY";

/// Hosted model family used for identification and advice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Gemini,
    Claude,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Claude => "claude",
        }
    }

    /// Keychain service name holding this provider's API key.
    pub fn keyring_service(&self) -> String {
        format!("weldmaster-{}-api", self.as_str())
    }

    /// Public API base for this provider.
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta/models",
            Provider::Claude => "https://api.anthropic.com/v1/messages",
        }
    }

    fn default_identify_model(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-3-pro-preview",
            Provider::Claude => "claude-sonnet-4-20250514",
        }
    }

    fn default_advice_model(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-3-flash-preview",
            Provider::Claude => "claude-sonnet-4-20250514",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: Provider,
    /// Overrides the provider's default identification model.
    pub identify_model: Option<String>,
    /// Overrides the provider's default advice model.
    pub advice_model: Option<String>,
    pub request_timeout_secs: u64,
    /// Delay before the manual machine entry is offered during identification.
    pub identify_soft_timeout_secs: u64,
    pub compression: CompressionOptions,
    /// Total bytes the persistent store may hold.
    pub storage_quota_bytes: usize,
    /// Directory for the persistent store; platform data dir when unset.
    pub data_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            identify_model: None,
            advice_model: None,
            request_timeout_secs: 60,
            identify_soft_timeout_secs: 10,
            compression: CompressionOptions::default(),
            storage_quota_bytes: 5 * 1024 * 1024,
            data_dir: None,
        }
    }
}

impl AppConfig {
    /// Load from the platform config dir, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        match default_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("No platform config directory, using default configuration");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn identify_model(&self) -> String {
        self.identify_model
            .clone()
            .unwrap_or_else(|| self.provider.default_identify_model().to_string())
    }

    pub fn advice_model(&self) -> String {
        self.advice_model
            .clone()
            .unwrap_or_else(|| self.provider.default_advice_model().to_string())
    }

    /// Directory holding the persistent store.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .context("Could not determine a data directory for this platform")
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        Ok(self.resolve_data_dir()?.join("weldmaster.db"))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Read the provider's API key from the keychain, then the environment.
/// An unusable keychain is logged and skipped.
pub fn load_api_key(provider: Provider) -> Option<String> {
    pick_api_key(
        keychain_api_key(&provider.keyring_service()),
        std::env::var(API_KEY_ENV).ok(),
    )
}

fn keychain_api_key(service: &str) -> Option<String> {
    let entry = match Entry::new(service, KEYRING_USER) {
        Ok(entry) => entry,
        Err(e) => {
            warn!("Failed to create keyring entry for {}: {}", service, e);
            return None;
        }
    };

    match entry.get_password() {
        Ok(key) => Some(key),
        Err(keyring::Error::NoEntry) => {
            debug!("No API key in keychain for service: {}", service);
            None
        }
        Err(e) => {
            warn!("Failed to read keychain for {}: {}", service, e);
            None
        }
    }
}

fn pick_api_key(keychain: Option<String>, env: Option<String>) -> Option<String> {
    keychain.or(env).filter(|k| !k.trim().is_empty())
}

/// Store the provider's API key in the keychain.
pub fn store_api_key(provider: Provider, key: &str) -> Result<(), WeldMasterError> {
    let service = provider.keyring_service();
    info!("Setting API key for service: {}", service);
    let entry = Entry::new(&service, KEYRING_USER)
        .map_err(|e| WeldMasterError::Keychain(e.to_string()))?;
    entry.set_password(key).map_err(|e| {
        warn!("Failed to set password for {}: {}", service, e);
        WeldMasterError::Keychain(e.to_string())
    })
}
