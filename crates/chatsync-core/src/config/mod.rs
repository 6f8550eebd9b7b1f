//! Runtime configuration for the consistency layer.
//!
//! Values come from built-in defaults, an optional JSON file, and
//! `CHATSYNC_*` environment variables, in that order of precedence.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url, normalize_base_url, normalize_text_option};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_SETTINGS_DEBOUNCE: Duration = Duration::from_millis(500);
const DEFAULT_CHAT_SYNC_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_SETTINGS_SYNC_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_WORKER_POOL_SIZE: usize = 4;
const DEFAULT_MAX_DELTA_BATCHES: usize = 50;
const DEFAULT_CONFLICT_CHANNEL_CAPACITY: usize = 10;

/// Configuration shared by the coordinators, scheduler and HTTP client
#[derive(Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Sync server base URL, e.g. `https://sync.example.com`
    pub base_url: Option<String>,
    /// Bearer token sent with every request
    pub auth_token: Option<String>,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Delay between a local settings edit and its push
    pub settings_debounce: Duration,
    /// Period of the background chat sync
    pub chat_sync_interval: Duration,
    /// Period of the background pending-settings sync
    pub settings_sync_interval: Duration,
    /// Maximum concurrently running sync tasks
    pub worker_pool_size: usize,
    /// Maximum pages fetched by one chat sync
    pub max_delta_batches: usize,
    /// Buffered conflict events per subscriber
    pub conflict_channel_capacity: usize,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncConfig")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("request_timeout", &self.request_timeout)
            .field("settings_debounce", &self.settings_debounce)
            .field("chat_sync_interval", &self.chat_sync_interval)
            .field("settings_sync_interval", &self.settings_sync_interval)
            .field("worker_pool_size", &self.worker_pool_size)
            .field("max_delta_batches", &self.max_delta_batches)
            .field("conflict_channel_capacity", &self.conflict_channel_capacity)
            .finish()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            auth_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            settings_debounce: DEFAULT_SETTINGS_DEBOUNCE,
            chat_sync_interval: DEFAULT_CHAT_SYNC_INTERVAL,
            settings_sync_interval: DEFAULT_SETTINGS_SYNC_INTERVAL,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            max_delta_batches: DEFAULT_MAX_DELTA_BATCHES,
            conflict_channel_capacity: DEFAULT_CONFLICT_CHANNEL_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Create a configuration pointing at a sync server
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Self::default()
        }
    }

    /// Set the bearer token
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Set the settings push debounce
    #[must_use]
    pub const fn with_settings_debounce(mut self, debounce: Duration) -> Self {
        self.settings_debounce = debounce;
        self
    }

    /// Set the background sync periods
    #[must_use]
    pub const fn with_sync_intervals(mut self, chats: Duration, settings: Duration) -> Self {
        self.chat_sync_interval = chats;
        self.settings_sync_interval = settings;
        self
    }

    /// Set the worker pool size
    #[must_use]
    pub const fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Set the page limit of one chat sync
    #[must_use]
    pub const fn with_max_delta_batches(mut self, batches: usize) -> Self {
        self.max_delta_batches = batches;
        self
    }

    /// Check if a sync server is configured
    pub const fn is_remote_configured(&self) -> bool {
        self.base_url.is_some()
    }

    /// Parse a JSON configuration file body
    pub fn from_json(payload: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid config JSON: {error}")))?;
        file.into_config()
    }

    /// Load the file at `path` (if any), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let payload = std::fs::read_to_string(path).map_err(|error| {
                    Error::Config(format!("failed to read {}: {error}", path.display()))
                })?;
                Self::from_json(&payload)?
            }
            None => Self::default(),
        };
        config.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `CHATSYNC_*` overrides from `lookup` and validate the result
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| normalize_text_option(lookup(name));

        if let Some(url) = get("CHATSYNC_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(token) = get("CHATSYNC_AUTH_TOKEN") {
            self.auth_token = Some(token);
        }
        if let Some(ms) = env_number(&get, "CHATSYNC_REQUEST_TIMEOUT_MS")? {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_number(&get, "CHATSYNC_SETTINGS_DEBOUNCE_MS")? {
            self.settings_debounce = Duration::from_millis(ms);
        }
        if let Some(secs) = env_number(&get, "CHATSYNC_CHAT_SYNC_INTERVAL_SECS")? {
            self.chat_sync_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number(&get, "CHATSYNC_SETTINGS_SYNC_INTERVAL_SECS")? {
            self.settings_sync_interval = Duration::from_secs(secs);
        }
        if let Some(size) = env_number(&get, "CHATSYNC_WORKER_POOL_SIZE")? {
            self.worker_pool_size = size;
        }
        if let Some(batches) = env_number(&get, "CHATSYNC_MAX_DELTA_BATCHES")? {
            self.max_delta_batches = batches;
        }

        self.validate()?;
        Ok(self)
    }

    /// Check value ranges and normalize the base URL
    pub fn validate(&mut self) -> Result<()> {
        if let Some(url) = normalize_text_option(self.base_url.take()) {
            if !is_http_url(&url) {
                return Err(Error::Config(format!(
                    "base_url must include http:// or https:// (got '{}')",
                    compact_text(&url)
                )));
            }
            self.base_url = Some(normalize_base_url(&url));
        }
        self.auth_token = normalize_text_option(self.auth_token.take());

        if self.worker_pool_size == 0 {
            return Err(Error::Config("worker_pool_size must be at least 1".into()));
        }
        if self.max_delta_batches == 0 {
            return Err(Error::Config("max_delta_batches must be at least 1".into()));
        }
        if self.conflict_channel_capacity == 0 {
            return Err(Error::Config(
                "conflict_channel_capacity must be at least 1".into(),
            ));
        }
        if self.chat_sync_interval.is_zero() || self.settings_sync_interval.is_zero() {
            return Err(Error::Config("sync intervals must be positive".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default)]
    request_timeout_ms: Option<u64>,
    #[serde(default)]
    settings_debounce_ms: Option<u64>,
    #[serde(default)]
    chat_sync_interval_secs: Option<u64>,
    #[serde(default)]
    settings_sync_interval_secs: Option<u64>,
    #[serde(default)]
    worker_pool_size: Option<usize>,
    #[serde(default)]
    max_delta_batches: Option<usize>,
    #[serde(default)]
    conflict_channel_capacity: Option<usize>,
}

impl ConfigFile {
    fn into_config(self) -> Result<SyncConfig> {
        let defaults = SyncConfig::default();
        let mut config = SyncConfig {
            base_url: self.base_url,
            auth_token: self.auth_token,
            request_timeout: self
                .request_timeout_ms
                .map_or(defaults.request_timeout, Duration::from_millis),
            settings_debounce: self
                .settings_debounce_ms
                .map_or(defaults.settings_debounce, Duration::from_millis),
            chat_sync_interval: self
                .chat_sync_interval_secs
                .map_or(defaults.chat_sync_interval, Duration::from_secs),
            settings_sync_interval: self
                .settings_sync_interval_secs
                .map_or(defaults.settings_sync_interval, Duration::from_secs),
            worker_pool_size: self.worker_pool_size.unwrap_or(defaults.worker_pool_size),
            max_delta_batches: self.max_delta_batches.unwrap_or(defaults.max_delta_batches),
            conflict_channel_capacity: self
                .conflict_channel_capacity
                .unwrap_or(defaults.conflict_channel_capacity),
        };
        config.validate()?;
        Ok(config)
    }
}

fn env_number<T, G>(get: &G, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(name)
        .map(|value| {
            value
                .parse()
                .map_err(|_| Error::Config(format!("{name} must be a non-negative integer")))
        })
        .transpose()
}
