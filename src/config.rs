//! Configuration management for ROMHarvest.
//!
//! Settings come from a TOML file (`romharvest.toml` in the working directory,
//! or `config.toml` under the user config dir), with API credentials
//! overridable from the environment. All fields are validated at load time so
//! a bad config fails the run before any work starts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scraper::rate_limiter::{Endpoint, RateLimitConfig, WindowLimit};

/// Environment variable overriding the configured API username.
pub const ENV_USERNAME: &str = "ROMHARVEST_USERNAME";
/// Environment variable overriding the configured API password.
pub const ENV_PASSWORD: &str = "ROMHARVEST_PASSWORD";

/// Configuration errors, all fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found (searched ./romharvest.toml and the user config dir); run `romh init`")]
    NotFound,
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub api: ApiSettings,
    #[serde(default)]
    pub scrape: ScrapeSettings,
    /// Per-endpoint rate-limit overrides, keyed by endpoint name
    /// (`user_info`, `game_info`, `search`, `media_download`).
    #[serde(default)]
    pub rate_limits: HashMap<String, RateOverride>,
    /// Known systems, keyed by system name (e.g. "snes").
    #[serde(default)]
    pub systems: HashMap<String, SystemSettings>,
}

/// Remote API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl ApiSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Scrape run behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSettings {
    /// Retry attempts per ROM for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Checkpoint save interval, in completed items.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    /// Safety clamp applied to the API-reported thread allowance.
    #[serde(default)]
    pub workers: WorkerBounds,
    /// Media kinds to download (`image`, `video`, `marquee`).
    #[serde(default = "default_media_kinds")]
    pub media: Vec<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_checkpoint_interval() -> usize {
    25
}

fn default_media_kinds() -> Vec<String> {
    vec!["image".to_string()]
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            checkpoint_interval: default_checkpoint_interval(),
            workers: WorkerBounds::default(),
            media: default_media_kinds(),
        }
    }
}

/// Clamp range for worker concurrency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerBounds {
    #[serde(default = "default_min_workers")]
    pub min: usize,
    #[serde(default = "default_max_workers")]
    pub max: usize,
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    8
}

impl Default for WorkerBounds {
    fn default() -> Self {
        Self {
            min: default_min_workers(),
            max: default_max_workers(),
        }
    }
}

impl WorkerBounds {
    /// Clamp an API-reported thread allowance into this range.
    pub fn clamp(&self, reported: usize) -> usize {
        reported.clamp(self.min, self.max)
    }
}

/// A rate-limit override for one endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateOverride {
    pub calls: usize,
    pub window_seconds: u64,
}

/// Per-system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSettings {
    /// ROM file extensions, without dots (e.g. `["sfc", "smc", "zip"]`).
    pub extensions: Vec<String>,
    /// Default ROM directory for this system.
    #[serde(default)]
    pub rom_dir: Option<String>,
    /// Default output directory for gamelist and media.
    #[serde(default)]
    pub output_dir: Option<String>,
}

impl SystemSettings {
    /// Resolve the ROM directory, expanding `~`.
    pub fn resolved_rom_dir(&self) -> Option<PathBuf> {
        self.rom_dir.as_deref().map(expand_path)
    }

    /// Resolve the output directory, expanding `~`.
    pub fn resolved_output_dir(&self) -> Option<PathBuf> {
        self.output_dir.as_deref().map(expand_path)
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

impl Settings {
    /// Load settings from an explicit path or by discovery.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::discover().ok_or(ConfigError::NotFound)?,
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut settings: Settings =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?;

        // Environment overrides for credentials
        if let Ok(user) = std::env::var(ENV_USERNAME) {
            settings.api.username = user;
        }
        if let Ok(pass) = std::env::var(ENV_PASSWORD) {
            settings.api.password = pass;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Search the working directory, then the user config dir.
    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from("romharvest.toml");
        if local.is_file() {
            return Some(local);
        }
        let dir = dirs::config_dir()?.join("romharvest").join("config.toml");
        dir.is_file().then_some(dir)
    }

    /// Validate all fields that later stages depend on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.api.base_url)
            .map_err(|e| ConfigError::Invalid(format!("api.base_url: {e}")))?;

        if self.api.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "api.request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.scrape.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "scrape.max_retries must be at least 1".into(),
            ));
        }
        if self.scrape.checkpoint_interval == 0 {
            return Err(ConfigError::Invalid(
                "scrape.checkpoint_interval must be at least 1".into(),
            ));
        }
        let bounds = self.scrape.workers;
        if bounds.min == 0 || bounds.min > bounds.max {
            return Err(ConfigError::Invalid(format!(
                "scrape.workers: invalid range [{}, {}]",
                bounds.min, bounds.max
            )));
        }
        for kind in &self.scrape.media {
            if !matches!(kind.as_str(), "image" | "video" | "marquee") {
                return Err(ConfigError::Invalid(format!(
                    "scrape.media: unknown media kind {kind:?}"
                )));
            }
        }
        for (name, limit) in &self.rate_limits {
            if Endpoint::from_name(name).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "rate_limits: unknown endpoint {name:?}"
                )));
            }
            if limit.calls == 0 || limit.window_seconds == 0 {
                return Err(ConfigError::Invalid(format!(
                    "rate_limits.{name}: calls and window_seconds must be at least 1"
                )));
            }
        }
        for (system, sys) in &self.systems {
            if sys.extensions.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "systems.{system}: extensions must not be empty"
                )));
            }
        }
        Ok(())
    }

    /// Build the rate limiter config, applying per-endpoint overrides.
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        let mut config = RateLimitConfig::default();
        for (name, over) in &self.rate_limits {
            if let Some(endpoint) = Endpoint::from_name(name) {
                config.limits.insert(
                    endpoint,
                    WindowLimit {
                        calls: over.calls,
                        window: Duration::from_secs(over.window_seconds),
                    },
                );
            }
        }
        config
    }
}

/// Default config written by `romh init`.
pub const DEFAULT_CONFIG: &str = r#"[api]
base_url = "https://api.screenquarry.example/v1"
username = ""
password = ""
request_timeout_secs = 30

[scrape]
max_retries = 3
checkpoint_interval = 25
media = ["image"]

[scrape.workers]
min = 1
max = 8

# Per-endpoint rate-limit overrides. Defaults are conservative.
# [rate_limits.game_info]
# calls = 60
# window_seconds = 60

[systems.snes]
extensions = ["sfc", "smc", "zip"]

[systems.megadrive]
extensions = ["md", "bin", "zip"]
"#;
