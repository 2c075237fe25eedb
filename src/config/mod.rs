//! Agent configuration.
//!
//! Every field defaults to the values the FocusFlow worker ships with, so an
//! empty or missing config file yields the stock agent. Bumping
//! `caches.shell` (e.g. `focusflow-v2`) whenever `shell_assets` changes is
//! what makes the next activation sweep the previous generation.
//!
//! Search order used by [`AgentConfig::load`]:
//!
//! 1. Explicit path if provided (must exist)
//! 2. `./focusflow.yaml`
//! 3. `$XDG_CONFIG_HOME/focusflow/config.yaml`
//! 4. Built-in defaults

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("`{field}` entry {value:?} cannot be resolved against the origin: {source}")]
    Unresolvable {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Origin of the application the agent serves. Relative paths below are
    /// resolved against it, and responses from it count as same-origin.
    pub origin: Url,
    /// Any request URL containing this substring bypasses the cache.
    pub api_marker: String,
    pub caches: CacheNames,
    /// Fetched all-or-nothing at install time.
    pub shell_assets: Vec<String>,
    /// Served from cache when a navigation fails on the network.
    pub offline_fallback: String,
    /// Key of the single plan snapshot entry.
    pub plan_key: String,
    pub sync: SyncConfig,
    pub notifications: NotificationDefaults,
    pub host: HostConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheNames {
    pub shell: String,
    pub plans: String,
    /// Bucket names the activation sweep leaves alone in addition to `shell`.
    pub retained: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub tag: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    /// Window opened when a notification is tapped.
    pub start_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub listen: String,
    /// Path prefix the proxy host reserves for delivering platform events.
    pub control_prefix: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:3000").expect("static origin is a valid URL"),
            api_marker: "/api/".to_owned(),
            caches: CacheNames::default(),
            shell_assets: [
                "/",
                "/static/js/bundle.js",
                "/static/css/main.css",
                "/manifest.json",
                "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css",
                "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js",
                "https://fonts.googleapis.com/css2?family=Inter:wght@400;500;600;700&display=swap",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            offline_fallback: "/".to_owned(),
            plan_key: "/api/plan/today".to_owned(),
            sync: SyncConfig::default(),
            notifications: NotificationDefaults::default(),
            host: HostConfig::default(),
        }
    }
}

impl Default for CacheNames {
    fn default() -> Self {
        Self {
            shell: "focusflow-v1".to_owned(),
            plans: "focusflow-plans-v1".to_owned(),
            retained: Vec::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tag: "background-sync-tasks".to_owned(),
            endpoint: "/api/tasks".to_owned(),
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "FocusFlow Reminder".to_owned(),
            body: "Time to focus on your next task!".to_owned(),
            icon: "/icon-192x192.png".to_owned(),
            badge: "/badge-72x72.png".to_owned(),
            vibrate: vec![100, 50, 100],
            start_url: "/".to_owned(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_owned(),
            control_prefix: "/__agent/".to_owned(),
        }
    }
}

impl AgentConfig {
    /// Loads configuration following the module-level search order.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit_path {
            Some(p) if p.exists() => Some(p.to_path_buf()),
            Some(p) => return Err(ConfigError::NotFound(p.to_path_buf())),
            None => Self::find_config_file(),
        };

        match path {
            Some(p) => Self::load_from_path(&p),
            None => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn find_config_file() -> Option<PathBuf> {
        let local = PathBuf::from("focusflow.yaml");
        if local.exists() {
            return Some(local);
        }

        dirs::config_dir()
            .map(|dir| dir.join("focusflow").join("config.yaml"))
            .filter(|p| p.exists())
    }

    fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading config");
        Self::from_yaml(&contents)
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every configured path resolves against `origin`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for asset in &self.shell_assets {
            self.resolve_field("shell_assets", asset)?;
        }
        self.resolve_field("offline_fallback", &self.offline_fallback)?;
        self.resolve_field("plan_key", &self.plan_key)?;
        self.resolve_field("sync.endpoint", &self.sync.endpoint)?;
        self.resolve_field("notifications.start_url", &self.notifications.start_url)?;
        Ok(())
    }

    /// Resolves a path (or absolute URL) against the application origin.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        self.origin.join(path)
    }

    /// The shell asset list as absolute URLs.
    pub fn shell_asset_urls(&self) -> Result<Vec<Url>, url::ParseError> {
        self.shell_assets.iter().map(|a| self.resolve(a)).collect()
    }

    fn resolve_field(&self, field: &'static str, value: &str) -> Result<Url, ConfigError> {
        self.resolve(value).map_err(|source| ConfigError::Unresolvable {
            field,
            value: value.to_owned(),
            source,
        })
    }
}
