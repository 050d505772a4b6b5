//! Configuration schema definitions.
//!
//! This module defines the structure of the configuration file using serde.
//! Every section has defaults, so a file only needs the keys it changes.

use super::error::{ConfigError, ConfigResult};
use crate::port::PortConfiguration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port to open when none is given on the command line
    pub port: PortConfiguration,
    /// Short names for port identifiers, e.g. `gps = "/dev/ttyUSB0"`
    pub aliases: HashMap<String, String>,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve a port name through aliases.
    pub fn resolve_port(&self, name: &str) -> String {
        self.aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// The configured port with its name resolved through aliases.
    pub fn resolved_port(&self) -> PortConfiguration {
        PortConfiguration {
            name: self.resolve_port(&self.port.name),
            ..self.port.clone()
        }
    }

    /// Reject alias entries that cannot resolve to a port.
    ///
    /// Resolution is a single lookup, so an alias pointing at another alias
    /// is refused rather than silently left unresolved.
    pub fn check_aliases(&self) -> ConfigResult<()> {
        for (alias, target) in &self.aliases {
            let key = format!("aliases.{alias}");
            if alias.trim().is_empty() {
                return Err(ConfigError::invalid("aliases", "alias names must not be empty"));
            }
            if target.trim().is_empty() {
                return Err(ConfigError::invalid(key, "must name a port"));
            }
            if self.aliases.contains_key(target) {
                return Err(ConfigError::invalid(key, format!("points at another alias '{target}'")));
            }
        }
        Ok(())
    }

    /// Reject values no backend could open.
    ///
    /// Platform-specific limits (such as the POSIX baud table) are left to
    /// the backend.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.port.name.trim().is_empty() {
            return Err(ConfigError::invalid("port.name", "must not be empty"));
        }
        if self.port.baud == 0 {
            return Err(ConfigError::invalid("port.baud", "must be positive"));
        }
        if !matches!(self.port.byte_size, 0 | 5..=8) {
            return Err(ConfigError::invalid(
                "port.byte_size",
                format!("{} is not one of 5, 6, 7, 8", self.port.byte_size),
            ));
        }
        if self.port.stop_bits > 2 {
            return Err(ConfigError::invalid(
                "port.stop_bits",
                format!("{} is not 1 or 2", self.port.stop_bits),
            ));
        }
        Ok(())
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive: "trace", "debug", "info", "warn", "error" or a full
    /// `tracing_subscriber::EnvFilter` string. `RUST_LOG` takes precedence.
    pub level: String,
    /// Log format: "pretty", "compact", "full"
    pub format: LogFormat,
    /// Colourise output
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
            ansi: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line format with colors
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
    /// Default single-line format
    Full,
}
