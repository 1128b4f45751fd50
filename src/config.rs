//! Runtime configuration.
//!
//! Loaded once at startup from an optional JSON file, then overridden by
//! command-line flags and environment variables (see [`crate::cli`]).

use crate::connection::Timeouts;
use crate::dispatch::CommandSettings;
use crate::session::SessionSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

/// Complete bot configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Server host name or address.
    pub host: String,
    /// ServerQuery port.
    pub query_port: u16,
    pub username: String,
    pub password: String,
    /// Pause before each reconnection attempt.
    pub reconnect_delay_secs: u64,
    pub max_reconnect_attempts: u32,
    /// Interval between liveness probes.
    pub keepalive_interval_secs: u64,
    /// Interval between "still running" log lines.
    pub status_interval_secs: u64,
    pub connect_timeout_secs: u64,
    /// Per-receive wait while a command is in flight.
    pub reply_timeout_ms: u64,
    /// Per-receive wait while idle.
    pub poll_timeout_ms: u64,
    /// Pause between idle loop iterations.
    pub idle_pause_ms: u64,
    /// Text sent with `!mp`.
    pub poke_message: String,
    /// Reason sent with `!mk`.
    pub kick_message: String,
}

impl Default for Config {
    fn default() -> Self {
        let commands = CommandSettings::default();
        Self {
            host: "127.0.0.1".to_string(),
            query_port: 10011,
            username: String::new(),
            password: String::new(),
            reconnect_delay_secs: 5,
            max_reconnect_attempts: 5,
            keepalive_interval_secs: 60,
            status_interval_secs: 300,
            connect_timeout_secs: 10,
            reply_timeout_ms: 2000,
            poll_timeout_ms: 100,
            idle_pause_ms: 500,
            poke_message: commands.poke_message,
            kick_message: commands.kick_message,
        }
    }
}

impl Config {
    /// Load a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path` if given, else the default file if it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Check that required settings are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Missing("host"));
        }
        if self.username.is_empty() {
            return Err(ConfigError::Missing("username"));
        }
        if self.password.is_empty() {
            return Err(ConfigError::Missing("password"));
        }
        Ok(())
    }

    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connect_timeout_secs),
            reply: Duration::from_millis(self.reply_timeout_ms),
            poll: Duration::from_millis(self.poll_timeout_ms),
        }
    }

    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            username: self.username.clone(),
            password: self.password.clone(),
            timeouts: self.timeouts(),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }

    #[must_use]
    pub fn command_settings(&self) -> CommandSettings {
        CommandSettings {
            poke_message: self.poke_message.clone(),
            kick_message: self.kick_message.clone(),
        }
    }

    #[must_use]
    pub const fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    #[must_use]
    pub const fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    #[must_use]
    pub const fn idle_pause(&self) -> Duration {
        Duration::from_millis(self.idle_pause_ms)
    }
}

/// `$XDG_CONFIG_HOME/querybot/config.json` or the platform equivalent.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("querybot").join("config.json"))
}
