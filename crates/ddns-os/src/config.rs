//! Configuration types for the OS layer
//!
//! Parsing the agent's own settings is not this crate's job; these types only
//! describe the choices the layer needs (where diagnostics go, which hook
//! runs, how long it may take).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::CommandTemplate;
use crate::sink::Destination;

/// OS layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsConfig {
    /// Where diagnostic output goes
    #[serde(default)]
    pub log: LogDestinationConfig,

    /// Program name for the dedicated system log channel
    #[serde(default = "default_syslog_name")]
    pub syslog_name: String,

    /// Hook run after a successful update
    #[serde(default)]
    pub update_command: Option<String>,

    /// Time budget for one hook run (in seconds)
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Delay between address checks (in milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: i64,
}

impl OsConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            log: LogDestinationConfig::default(),
            syslog_name: default_syslog_name(),
            update_command: None,
            command_timeout_secs: default_command_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, crate::Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.log.validate()?;

        if self.syslog_name.trim().is_empty() {
            return Err(crate::Error::config("Syslog name cannot be empty"));
        }

        if self.command_timeout_secs == 0 {
            return Err(crate::Error::config("Command timeout must be > 0"));
        }

        if self.poll_interval_ms <= 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }

        if let Some(template) = &self.update_command {
            CommandTemplate::parse(template.as_str())
                .map_err(|e| crate::Error::config(format!("update_command: {}", e)))?;
        }

        Ok(())
    }

    /// Parsed hook template, if one is configured
    pub fn command_template(&self) -> Result<Option<CommandTemplate>, crate::Error> {
        self.update_command
            .as_deref()
            .map(CommandTemplate::parse)
            .transpose()
    }

    /// Hook timeout as a `Duration`
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for OsConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Diagnostic output destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogDestinationConfig {
    /// Standard output
    #[default]
    Stdout,

    /// System log
    Syslog {
        /// Program name tag (defaults to the configured syslog name)
        name: Option<String>,
    },

    /// Append-only log file
    File {
        /// Path to the log file
        path: PathBuf,
    },
}

impl LogDestinationConfig {
    /// Validate the destination
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            LogDestinationConfig::File { path } => {
                if path.as_os_str().is_empty() {
                    return Err(crate::Error::config("Log file path cannot be empty"));
                }
                Ok(())
            }
            LogDestinationConfig::Syslog { name: Some(name) } if name.trim().is_empty() => {
                Err(crate::Error::config("Syslog name cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Resolve into a sink destination, using `fallback_name` for syslog
    pub fn to_destination(&self, fallback_name: &str) -> Destination {
        match self {
            LogDestinationConfig::Stdout => Destination::Console,
            LogDestinationConfig::Syslog { name } => Destination::Syslog {
                name: name.clone().unwrap_or_else(|| fallback_name.to_string()),
            },
            LogDestinationConfig::File { path } => Destination::File { path: path.clone() },
        }
    }

    /// Log file path, if this is the file destination
    pub fn log_file(&self) -> Option<&Path> {
        match self {
            LogDestinationConfig::File { path } => Some(path),
            _ => None,
        }
    }
}

fn default_syslog_name() -> String {
    "ddnsd".to_string()
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> i64 {
    600_000
}
