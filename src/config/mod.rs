//! Configuration module for serial-stream.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_STREAM_CONFIG` environment variable (explicit path)
//! 2. `./serial-stream.toml` (current directory)
//! 3. `~/.config/serial-stream/config.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\serial-stream\config.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! Alias entries are checked when a file is read: each must name a port
//! directly, not another alias.
//!
//! # Environment Overrides
//!
//! - `SERIAL_STREAM_PORT_NAME=/dev/ttyUSB0`
//! - `SERIAL_STREAM_PORT_BAUD=115200`
//! - `SERIAL_STREAM_PORT_PARITY=even`
//! - `SERIAL_STREAM_PORT_TIMEOUT_MS=500`
//! - `SERIAL_STREAM_LOG_LEVEL=debug`
//!
//! # Example
//!
//! ```toml
//! [port]
//! name = "gps"
//! baud = 115200
//! parity = "none"
//! xon_flow_control = true
//!
//! [aliases]
//! gps = "/dev/ttyUSB0"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::{Config, LogFormat, LoggingConfig};
