//! Application settings storage
//!
//! Stores the service endpoint, credentials and canvas behaviour in a JSON
//! file in the user's config directory. Environment variables win over the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use crate::reconcile::{FallbackLayout, ReconcileOptions, StaleNodePolicy};

/// Global settings instance
static SETTINGS: RwLock<Option<Settings>> = RwLock::new(None);

/// Path to config file (set during init)
static CONFIG_PATH: RwLock<Option<PathBuf>> = RwLock::new(None);

pub const API_URL_ENV: &str = "PLANCANVAS_API_URL";
pub const API_TOKEN_ENV: &str = "PLANCANVAS_API_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_secs: u64,
    /// What to do with canvas cards whose task was deleted (default: keep)
    #[serde(default)]
    pub stale_nodes: StaleNodePolicy,
    /// Grid for cards without a saved position
    #[serde(default)]
    pub layout: FallbackLayout,
}

fn default_api_base_url() -> String {
    "http://127.0.0.1:3741".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_autosave_interval() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_token: None,
            request_timeout_secs: default_request_timeout(),
            autosave_interval_secs: default_autosave_interval(),
            stale_nodes: StaleNodePolicy::default(),
            layout: FallbackLayout::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk or fall back to defaults
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Settings::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "unreadable settings, using defaults");
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))?;
        Ok(())
    }

    /// Apply environment overrides on top of the stored values
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = non_empty_env(API_URL_ENV) {
            self.api_base_url = url;
        }
        if let Some(token) = non_empty_env(API_TOKEN_ENV) {
            self.api_token = Some(token);
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs.max(1))
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            stale_nodes: self.stale_nodes,
            layout: self.layout.clone(),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Default config directory (`~/.config/plancanvas` on Linux)
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("plancanvas"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Initialize settings from `settings.json` in the given directory
pub fn init(config_dir: PathBuf) {
    let config_path = config_dir.join("settings.json");
    let settings = Settings::load(&config_path);

    if let Ok(mut guard) = CONFIG_PATH.write() {
        *guard = Some(config_path);
    }
    if let Ok(mut guard) = SETTINGS.write() {
        *guard = Some(settings);
    }
}

/// Current settings with environment overrides applied
pub fn current() -> Settings {
    let stored = SETTINGS
        .read()
        .ok()
        .and_then(|guard| guard.clone())
        .unwrap_or_default();
    stored.with_env_overrides()
}

/// Set and save the API base URL
pub fn set_api_base_url(url: String) -> Result<(), String> {
    update(|s| s.api_base_url = url)
}

/// Set and save the API token (empty string clears it)
pub fn set_api_token(token: String) -> Result<(), String> {
    update(|s| s.api_token = if token.is_empty() { None } else { Some(token) })
}

/// Get masked API token for display (shows first/last 4 chars)
pub fn get_masked_api_token() -> Option<String> {
    current().api_token.as_deref().map(mask_token)
}

fn mask_token(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "*".repeat(chars.len())
    }
}

fn update(f: impl FnOnce(&mut Settings)) -> Result<(), String> {
    let mut settings_guard = SETTINGS.write().map_err(|_| "Failed to acquire settings lock")?;
    let settings = settings_guard.get_or_insert_with(Settings::default);
    f(settings);

    let config_path = CONFIG_PATH
        .read()
        .map_err(|_| "Failed to acquire config path lock")?
        .clone()
        .ok_or("Settings not initialized")?;

    settings.save(&config_path)?;
    tracing::info!(path = %config_path.display(), "settings saved");
    Ok(())
}
