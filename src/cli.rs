//! Command-line interface for querybot.

use crate::config::{Config, ConfigError};
use clap::Parser;
use std::path::PathBuf;

/// ServerQuery chat command bot.
///
/// Settings come from the config file first; flags and environment
/// variables override them.
#[derive(Debug, Parser)]
#[command(name = "querybot", version, about)]
pub struct Cli {
    /// Path to a JSON config file.
    #[arg(long, short, env = "QUERYBOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server host.
    #[arg(long, env = "QUERYBOT_HOST")]
    pub host: Option<String>,

    /// ServerQuery port.
    #[arg(long, short, env = "QUERYBOT_QUERY_PORT")]
    pub port: Option<u16>,

    /// Query login name.
    #[arg(long, short, env = "QUERYBOT_USERNAME")]
    pub username: Option<String>,

    /// Query login password.
    #[arg(long, env = "QUERYBOT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Seconds to wait before each reconnection attempt.
    #[arg(long, value_name = "SECS")]
    pub reconnect_delay: Option<u64>,

    /// Give up after this many consecutive failed reconnections.
    #[arg(long, value_name = "N")]
    pub max_reconnect_attempts: Option<u32>,

    /// Seconds between liveness checks.
    #[arg(long, value_name = "SECS")]
    pub keepalive_interval: Option<u64>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Load the config file and apply overrides from flags and environment.
    pub fn resolve_config(&self) -> Result<Config, ConfigError> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Override config values with the ones given on the command line.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.query_port = port;
        }
        if let Some(username) = &self.username {
            config.username.clone_from(username);
        }
        if let Some(password) = &self.password {
            config.password.clone_from(password);
        }
        if let Some(delay) = self.reconnect_delay {
            config.reconnect_delay_secs = delay;
        }
        if let Some(max) = self.max_reconnect_attempts {
            config.max_reconnect_attempts = max;
        }
        if let Some(interval) = self.keepalive_interval {
            config.keepalive_interval_secs = interval;
        }
    }
}
