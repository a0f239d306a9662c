//! Service configuration.
//!
//! Values come from code (`Default`), a JSON file, or `NOTIFY_*` environment
//! variables. Channel providers are only configurable through JSON because
//! their settings are nested.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::notification::channels::{ChannelConfig, DEFAULT_INBOX_CAPACITY};
use crate::notification::queue::QueueMode;
use crate::{Error, Result};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "NOTIFY_";

/// Configuration for the notification manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Whether the service host should run the dispatcher at all.
    pub enabled: bool,
    /// Ordering of the dispatch queue.
    pub queue_mode: QueueMode,
    /// Maximum number of queued requests.
    pub max_queue_size: usize,
    /// Bounded wait of one dequeue attempt, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Capacity of the dispatch report broadcast.
    pub event_buffer: usize,
    /// Default per-recipient capacity of in-app inboxes.
    pub inbox_capacity: usize,
    /// Channel providers to build at startup.
    pub channels: Vec<ChannelConfig>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_mode: QueueMode::Fifo,
            max_queue_size: 10_000,
            poll_timeout_ms: 500,
            event_buffer: 256,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            channels: Vec::new(),
        }
    }
}

impl NotifyConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, starting from the defaults.
    ///
    /// Recognized keys: `NOTIFY_ENABLED`, `NOTIFY_QUEUE_MODE`,
    /// `NOTIFY_MAX_QUEUE_SIZE`, `NOTIFY_POLL_TIMEOUT_MS`,
    /// `NOTIFY_EVENT_BUFFER`, `NOTIFY_INBOX_CAPACITY`, `NOTIFY_CONFIG_FILE`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = match get("CONFIG_FILE") {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };

        if let Some(v) = get("ENABLED") {
            config.enabled = parse_bool("ENABLED", &v)?;
        }
        if let Some(v) = get("QUEUE_MODE") {
            config.queue_mode = v.parse()?;
        }
        if let Some(v) = get("MAX_QUEUE_SIZE") {
            config.max_queue_size = parse_number("MAX_QUEUE_SIZE", &v)?;
        }
        if let Some(v) = get("POLL_TIMEOUT_MS") {
            config.poll_timeout_ms = parse_number("POLL_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("EVENT_BUFFER") {
            config.event_buffer = parse_number("EVENT_BUFFER", &v)?;
        }
        if let Some(v) = get("INBOX_CAPACITY") {
            config.inbox_capacity = parse_number("INBOX_CAPACITY", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a full configuration (including channels) from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(Error::config("max_queue_size must be greater than zero"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(Error::config("poll_timeout_ms must be greater than zero"));
        }
        if self.event_buffer == 0 {
            return Err(Error::config("event_buffer must be greater than zero"));
        }
        if self.inbox_capacity == 0 {
            return Err(Error::config("inbox_capacity must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.channel_id()) {
                return Err(Error::config(format!(
                    "duplicate channel id: {}",
                    channel.channel_id()
                )));
            }
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!(
            "{ENV_PREFIX}{name} must be a boolean, got {value}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::config(format!(
            "{ENV_PREFIX}{name} must be a non-negative integer, got {value}"
        ))
    })
}
