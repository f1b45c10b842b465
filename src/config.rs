//! Configuration file parser for ~/.config/pithy/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde but logged as warnings, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::FetcherConfig;
use crate::refresh::SchedulerConfig;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Defaults to `pithy.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// Number of feeds refreshed concurrently.
    pub pool_size: usize,

    /// Feeds checked within this many minutes are skipped.
    pub stale_window_minutes: u64,

    /// Seconds between the starts of consecutive refresh rounds.
    pub tick_interval_seconds: u64,

    /// Seconds to wait for a connection and response headers.
    pub header_timeout_seconds: u64,

    /// Seconds to wait for the full response body.
    pub body_timeout_seconds: u64,

    /// Responses larger than this many bytes are rejected.
    pub max_feed_bytes: usize,

    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let scheduler = SchedulerConfig::default();
        let fetcher = FetcherConfig::default();
        Self {
            database_path: None,
            pool_size: scheduler.pool_size,
            stale_window_minutes: scheduler.stale_window.as_secs() / 60,
            tick_interval_seconds: scheduler.tick_interval.as_secs(),
            header_timeout_seconds: fetcher.header_timeout.as_secs(),
            body_timeout_seconds: fetcher.body_timeout.as_secs(),
            max_feed_bytes: fetcher.max_body_bytes,
            user_agent: fetcher.user_agent,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Longest accepted interval or timeout (one week).
    const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

    const KNOWN_KEYS: [&'static str; 8] = [
        "database_path",
        "pool_size",
        "stale_window_minutes",
        "tick_interval_seconds",
        "header_timeout_seconds",
        "body_timeout_seconds",
        "max_feed_bytes",
        "user_agent",
    ];

    /// Load and validate configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Out-of-range values → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never pulled into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            pool_size = config.pool_size,
            tick_interval_seconds = config.tick_interval_seconds,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Reject values the scheduler or fetcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("pool_size", self.pool_size as u64),
            ("tick_interval_seconds", self.tick_interval_seconds),
            ("header_timeout_seconds", self.header_timeout_seconds),
            ("body_timeout_seconds", self.body_timeout_seconds),
            ("max_feed_bytes", self.max_feed_bytes as u64),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        let bounded = [
            ("stale_window_minutes", self.stale_window_minutes.saturating_mul(60)),
            ("tick_interval_seconds", self.tick_interval_seconds),
            ("header_timeout_seconds", self.header_timeout_seconds),
            ("body_timeout_seconds", self.body_timeout_seconds),
        ];
        for (key, seconds) in bounded {
            if seconds > Self::MAX_INTERVAL_SECS {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("must not exceed {} seconds", Self::MAX_INTERVAL_SECS),
                });
            }
        }

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "user_agent",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            pool_size: self.pool_size,
            stale_window: Duration::from_secs(self.stale_window_minutes.saturating_mul(60)),
            tick_interval: Duration::from_secs(self.tick_interval_seconds),
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            header_timeout: Duration::from_secs(self.header_timeout_seconds),
            body_timeout: Duration::from_secs(self.body_timeout_seconds),
            max_body_bytes: self.max_feed_bytes,
            user_agent: self.user_agent.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
