//! Messaging configuration.
//!
//! Values come from defaults, a TOML document, or `HASKE_WS_*` environment
//! variables (a `.env` file is loaded first when present).

use crate::error::{WebSocketError, WebSocketResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "HASKE_WS";

/// WebSocket messaging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Maximum payload of a single frame in bytes
    pub max_frame_size: usize,
    /// Maximum size of a reassembled message in bytes
    pub max_message_size: usize,
    /// Deadline for a single send, in milliseconds
    pub send_timeout_ms: u64,
    /// Interval between server pings in seconds; 0 disables heartbeats
    pub heartbeat_interval_secs: u64,
    /// Number of sends a broadcast keeps in flight
    pub broadcast_concurrency: usize,
    /// Reject unmasked frames from clients
    pub require_masked_frames: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            send_timeout_ms: 5_000,
            heartbeat_interval_secs: 30,
            broadcast_concurrency: 64,
            require_masked_frames: true,
        }
    }
}

impl WebSocketConfig {
    /// Create a builder.
    pub fn builder() -> WebSocketConfigBuilder {
        WebSocketConfigBuilder::new()
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> WebSocketResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| WebSocketError::Config(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> WebSocketResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            WebSocketError::Config(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load defaults overridden by `HASKE_WS_*` environment variables.
    pub fn from_env() -> WebSocketResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> WebSocketResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &str| lookup(&format!("{}_{}", ENV_PREFIX, name));

        if let Some(v) = get("MAX_FRAME_SIZE") {
            config.max_frame_size = parse_value("MAX_FRAME_SIZE", &v)?;
        }
        if let Some(v) = get("MAX_MESSAGE_SIZE") {
            config.max_message_size = parse_value("MAX_MESSAGE_SIZE", &v)?;
        }
        if let Some(v) = get("SEND_TIMEOUT_MS") {
            config.send_timeout_ms = parse_value("SEND_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval_secs = parse_value("HEARTBEAT_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("BROADCAST_CONCURRENCY") {
            config.broadcast_concurrency = parse_value("BROADCAST_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("REQUIRE_MASKED_FRAMES") {
            config.require_masked_frames = v == "1" || v.eq_ignore_ascii_case("true");
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would disable the core.
    pub fn validate(&self) -> WebSocketResult<()> {
        if self.max_frame_size == 0 {
            return Err(WebSocketError::Config("max_frame_size must be > 0".into()));
        }
        if self.max_message_size == 0 {
            return Err(WebSocketError::Config("max_message_size must be > 0".into()));
        }
        if self.send_timeout_ms == 0 {
            return Err(WebSocketError::Config("send_timeout_ms must be > 0".into()));
        }
        if self.broadcast_concurrency == 0 {
            return Err(WebSocketError::Config(
                "broadcast_concurrency must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Send deadline.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Heartbeat interval, if enabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> WebSocketResult<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        WebSocketError::Config(format!("{}_{}: {}", ENV_PREFIX, name, e))
    })
}

/// Builder for [`WebSocketConfig`].
#[derive(Debug, Default)]
pub struct WebSocketConfigBuilder {
    config: WebSocketConfig,
}

impl WebSocketConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum frame payload size.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the maximum reassembled message size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the per-send deadline.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the heartbeat interval; `None` disables heartbeats.
    pub fn heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.heartbeat_interval_secs = interval.map(|d| d.as_secs()).unwrap_or(0);
        self
    }

    /// Set how many broadcast sends run at once.
    pub fn broadcast_concurrency(mut self, concurrency: usize) -> Self {
        self.config.broadcast_concurrency = concurrency;
        self
    }

    /// Require or relax client frame masking.
    pub fn require_masked_frames(mut self, require: bool) -> Self {
        self.config.require_masked_frames = require;
        self
    }

    /// Validate and build.
    pub fn build(self) -> WebSocketResult<WebSocketConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
