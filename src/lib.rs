//! Serial Stream Library
//!
//! A uniform blocking byte stream over a physical or virtual serial port. A
//! portable `PortConfiguration` is translated into the platform's native
//! control block (termios on POSIX, DCB plus timeouts on Windows) and the
//! opened device is exposed through one `read`/`write`/`close` contract that
//! can be driven from independent reader and writer threads.
//!
//! # Modules
//!
//! - `port`: configuration record, platform backends, loopback pair and the
//!   `SerialStream` façade
//! - `config`: TOML configuration with environment overrides
//! - `logging`: tracing subscriber setup

pub mod config;
pub mod logging;
pub mod port;

// Re-export commonly used types for convenience
pub use port::{open, NativePort, Parity, PortConfiguration, PortError, SerialBackend, SerialStream};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
