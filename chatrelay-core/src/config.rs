//! Relay tuning configuration.
//!
//! Config file lives at `~/.config/chatrelay/relay.toml`. Every field is
//! optional in the file; missing values fall back to the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Delay before a reconnect attempt.
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;
/// Consecutive failed connect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Upper bound on waiting for a stale client to disconnect.
pub const DEFAULT_TEARDOWN_TIMEOUT_SECS: u64 = 5;
/// Capacity of the command and presentation event channels.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Seconds between a failure and the next connect attempt.
    pub reconnect_delay_secs: u64,
    /// Consecutive failed attempts (initial connect included) before the
    /// manager stops retrying.
    pub max_attempts: u32,
    /// Seconds to wait for a stale client's disconnect before moving on.
    pub teardown_timeout_secs: u64,
    pub event_buffer: usize,
    /// Keep at most this many messages in the log; 0 keeps everything.
    pub max_messages: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            teardown_timeout_secs: DEFAULT_TEARDOWN_TIMEOUT_SECS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            max_messages: 0,
        }
    }
}

fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatrelay")
        .join("relay.toml")
}

impl RelayConfig {
    /// Load from the default location, falling back to defaults when the
    /// file is missing or invalid.
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Load from `path`, falling back to defaults when the file is missing
    /// or invalid.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("can't read {}: {e}", path.display())))
            .and_then(|s| Self::from_toml_str(&s));
        match parsed {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring relay config");
                Self::default()
            }
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, RelayError> {
        let config: Self = toml::from_str(s).map_err(|e| RelayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), RelayError> {
        self.save_to(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), RelayError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| RelayError::Config(format!("can't create {}: {e}", dir.display())))?;
        }
        let s = toml::to_string_pretty(self).map_err(|e| RelayError::Config(e.to_string()))?;
        std::fs::write(path, s)
            .map_err(|e| RelayError::Config(format!("can't write {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_attempts == 0 {
            return Err(RelayError::Config("max_attempts must be at least 1".into()));
        }
        if self.event_buffer == 0 {
            return Err(RelayError::Config("event_buffer must be at least 1".into()));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }
}
