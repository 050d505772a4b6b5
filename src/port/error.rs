//! Port-specific error types.
//!
//! Every failure carries enough native context (the OS error and, for
//! configuration calls, the name of the call) to diagnose it. Nothing in the
//! port layer retries; retry policy belongs to the caller.

use super::traits::Parity;
use std::io;
use thiserror::Error;

/// Errors that can occur while opening, configuring or using a serial port.
#[derive(Debug, Error)]
pub enum PortError {
    /// The named device does not exist.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// The device exists but the caller may not open it.
    #[error("Permission denied opening serial port: {0}")]
    PermissionDenied(String),

    /// The native open call failed for another reason.
    #[error("Failed to open serial port '{name}': {source}")]
    DeviceOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The target exists but is not a terminal-class device.
    #[error("Not a terminal device: {0}")]
    NotATerminal(String),

    /// The requested rate is not one the backend can express.
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// The requested parity has no native representation on this backend.
    #[error("Unsupported parity: {0:?}")]
    UnsupportedParity(Parity),

    /// Applying the native control block failed.
    #[error("{call} failed: {source}")]
    NativeConfiguration {
        call: &'static str,
        #[source]
        source: io::Error,
    },

    /// A read or write failed with something other than pending/timeout.
    #[error("I/O error: {0}")]
    NativeIo(#[from] io::Error),

    /// The handle was already closed.
    #[error("Port is already closed")]
    AlreadyClosed,
}

impl PortError {
    /// Classify a failed native open call.
    pub fn from_open_error(name: impl Into<String>, source: io::Error) -> Self {
        let name = name.into();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound(name),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(name),
            _ => Self::DeviceOpen { name, source },
        }
    }

    /// Wrap the calling thread's last OS error as a configuration failure.
    pub fn native_configuration(call: &'static str) -> Self {
        Self::NativeConfiguration {
            call,
            source: io::Error::last_os_error(),
        }
    }

    /// Whether this error only reports that the handle was already closed.
    ///
    /// Callers that close defensively can treat this as non-fatal.
    pub fn is_already_closed(&self) -> bool {
        matches!(self, Self::AlreadyClosed)
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Self::NotFound(_) => io::ErrorKind::NotFound,
            Self::PermissionDenied(_) => io::ErrorKind::PermissionDenied,
            Self::DeviceOpen { source, .. } | Self::NativeConfiguration { source, .. } => {
                source.kind()
            }
            Self::NotATerminal(_) | Self::UnsupportedBaudRate(_) | Self::UnsupportedParity(_) => {
                io::ErrorKind::InvalidInput
            }
            Self::NativeIo(e) => e.kind(),
            Self::AlreadyClosed => io::ErrorKind::NotConnected,
        }
    }
}

/// Lets the stream implement `std::io::Read`/`Write`.
///
/// Native I/O errors pass through untouched so callers can still inspect
/// `raw_os_error()`.
impl From<PortError> for io::Error {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NativeIo(e) => e,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}
