//! Core types for the serial port abstraction.
//!
//! Defines the portable `PortConfiguration` record and the `SerialBackend`
//! trait that each platform (and the in-memory loopback) implements.

use super::error::PortError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Everything needed to open a serial port.
///
/// The record is only ever read once it is handed to an open call; each
/// backend derives its native control block from it and discards that block
/// after applying it.
///
/// # Example
/// ```
/// use serial_stream::port::{Parity, PortConfiguration};
///
/// let config = PortConfiguration::new("/dev/ttyUSB0", 115200)
///     .with_parity(Parity::Even)
///     .with_stop_bits(2);
/// assert_eq!(config.effective_byte_size(), 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfiguration {
    /// Platform port identifier (e.g. "/dev/ttyUSB0" or "COM3").
    pub name: String,

    /// Baud rate (bits per second).
    pub baud: u32,

    /// Data bits per frame, 5 to 8. Zero means 8.
    pub byte_size: u8,

    /// Parity checking mode.
    pub parity: Parity,

    /// Stop bits, 1 or 2. Zero means 1.
    pub stop_bits: u8,

    /// Hardware RTS/CTS flow control.
    pub rts_flow_control: bool,

    /// Hardware DTR/DSR flow control (Windows only).
    pub dtr_flow_control: bool,

    /// Software XON/XOFF flow control.
    pub xon_flow_control: bool,

    /// Read/write total timeout in milliseconds (Windows only).
    pub timeout_ms: u32,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            name: String::new(),
            baud: 9600,
            byte_size: 8,
            parity: Parity::None,
            stop_bits: 1,
            rts_flow_control: false,
            dtr_flow_control: false,
            xon_flow_control: false,
            timeout_ms: 0,
        }
    }
}

impl PortConfiguration {
    /// 8N1, no flow control, no timeout.
    pub fn new(name: impl Into<String>, baud: u32) -> Self {
        Self {
            name: name.into(),
            baud,
            ..Self::default()
        }
    }

    pub fn with_byte_size(self, byte_size: u8) -> Self {
        Self { byte_size, ..self }
    }

    pub fn with_parity(self, parity: Parity) -> Self {
        Self { parity, ..self }
    }

    pub fn with_stop_bits(self, stop_bits: u8) -> Self {
        Self { stop_bits, ..self }
    }

    pub fn with_rts_flow_control(self, enabled: bool) -> Self {
        Self {
            rts_flow_control: enabled,
            ..self
        }
    }

    pub fn with_dtr_flow_control(self, enabled: bool) -> Self {
        Self {
            dtr_flow_control: enabled,
            ..self
        }
    }

    pub fn with_xon_flow_control(self, enabled: bool) -> Self {
        Self {
            xon_flow_control: enabled,
            ..self
        }
    }

    pub fn with_timeout_ms(self, timeout_ms: u32) -> Self {
        Self { timeout_ms, ..self }
    }

    /// Data bits the backends actually apply: anything outside 5..=8 is 8.
    pub fn effective_byte_size(&self) -> u8 {
        match self.byte_size {
            5..=8 => self.byte_size,
            _ => 8,
        }
    }

    /// Stop bits the backends actually apply: anything but 2 is 1.
    pub fn effective_stop_bits(&self) -> u8 {
        match self.stop_bits {
            2 => 2,
            _ => 1,
        }
    }
}

/// Parity checking modes.
///
/// The discriminants are the numeric codes used on the wire by the Windows
/// control block; unknown codes decode as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Parity {
    #[default]
    None = 0,
    Odd = 1,
    Even = 2,
    Mark = 3,
    Space = 4,
}

impl Parity {
    /// Decode a numeric parity code. Unrecognised codes behave as `None`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Odd,
            2 => Self::Even,
            3 => Self::Mark,
            4 => Self::Space,
            _ => Self::None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Odd => "odd",
            Self::Even => "even",
            Self::Mark => "mark",
            Self::Space => "space",
        };
        f.write_str(name)
    }
}

/// Error returned when a parity name cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown parity '{0}' (expected none, odd, even, mark or space)")]
pub struct ParseParityError(String);

impl FromStr for Parity {
    type Err = ParseParityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            "mark" | "m" => Ok(Self::Mark),
            "space" | "s" => Ok(Self::Space),
            _ => Err(ParseParityError(s.to_string())),
        }
    }
}

/// Blocking byte-stream operations over an open port.
///
/// Implementations must allow one thread to read while another writes on the
/// same instance. Same-direction calls may be serialised internally (Windows)
/// or left to the caller (POSIX).
pub trait SerialBackend: Send + Sync + fmt::Debug {
    /// Block until at least one byte is available and copy it into `buffer`.
    ///
    /// A return of `Ok(0)` means a configured timeout elapsed with nothing
    /// received (or, for the loopback, that the peer has gone away).
    fn read(&self, buffer: &mut [u8]) -> Result<usize, PortError>;

    /// Block until some of `data` has been accepted by the transport.
    fn write(&self, data: &[u8]) -> Result<usize, PortError>;

    /// Release the native resource. A second close reports `AlreadyClosed`.
    fn close(&self) -> Result<(), PortError>;

    /// Change the read/write timeout. Backends without timeout support accept
    /// and ignore the value.
    fn set_timeout(&self, timeout_ms: u32) -> Result<(), PortError>;

    /// The name the port was opened with.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = PortConfiguration::default();
        assert_eq!(config.baud, 9600);
        assert_eq!(config.byte_size, 8);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, 1);
        assert!(!config.rts_flow_control);
        assert!(!config.dtr_flow_control);
        assert!(!config.xon_flow_control);
        assert_eq!(config.timeout_ms, 0);
    }

    #[test]
    fn test_builder_setters() {
        let config = PortConfiguration::new("COM45", 115200)
            .with_byte_size(7)
            .with_parity(Parity::Odd)
            .with_stop_bits(2)
            .with_rts_flow_control(true)
            .with_dtr_flow_control(true)
            .with_xon_flow_control(true)
            .with_timeout_ms(250);

        assert_eq!(config.name, "COM45");
        assert_eq!(config.baud, 115200);
        assert_eq!(config.byte_size, 7);
        assert_eq!(config.parity, Parity::Odd);
        assert_eq!(config.stop_bits, 2);
        assert!(config.rts_flow_control && config.dtr_flow_control && config.xon_flow_control);
        assert_eq!(config.timeout_ms, 250);
    }

    #[test]
    fn test_effective_byte_size() {
        for size in 5..=8 {
            assert_eq!(PortConfiguration::default().with_byte_size(size).effective_byte_size(), size);
        }
        assert_eq!(PortConfiguration::default().with_byte_size(0).effective_byte_size(), 8);
        assert_eq!(PortConfiguration::default().with_byte_size(9).effective_byte_size(), 8);
    }

    #[test]
    fn test_effective_stop_bits() {
        assert_eq!(PortConfiguration::default().with_stop_bits(0).effective_stop_bits(), 1);
        assert_eq!(PortConfiguration::default().with_stop_bits(1).effective_stop_bits(), 1);
        assert_eq!(PortConfiguration::default().with_stop_bits(2).effective_stop_bits(), 2);
        assert_eq!(PortConfiguration::default().with_stop_bits(3).effective_stop_bits(), 1);
    }

    #[test]
    fn test_parity_codes() {
        for parity in [Parity::None, Parity::Odd, Parity::Even, Parity::Mark, Parity::Space] {
            assert_eq!(Parity::from_code(parity.code()), parity);
        }
        assert_eq!(Parity::from_code(5), Parity::None);
        assert_eq!(Parity::from_code(255), Parity::None);
    }

    #[test]
    fn test_parity_from_str() {
        assert_eq!("EVEN".parse::<Parity>(), Ok(Parity::Even));
        assert_eq!("o".parse::<Parity>(), Ok(Parity::Odd));
        assert!("sideways".parse::<Parity>().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PortConfiguration = toml::from_str(
            r#"
            name = "/dev/ttyACM0"
            parity = "mark"
            "#,
        )
        .unwrap();
        assert_eq!(config.name, "/dev/ttyACM0");
        assert_eq!(config.baud, 9600);
        assert_eq!(config.parity, Parity::Mark);
        assert_eq!(config.stop_bits, 1);
    }
}
