//! Port abstraction layer for serial communication.
//!
//! A `PortConfiguration` is translated by the platform backend into its
//! native control block (termios on POSIX, DCB on Windows), applied to a
//! freshly opened device, and the result is wrapped in a `SerialStream`.
//! The backend is chosen at compile time; `loopback` provides an in-memory
//! pair behind the same `SerialBackend` trait.

pub mod error;
pub mod loopback;
pub mod stream;
pub mod traits;

#[cfg(unix)]
pub mod posix;

#[cfg(windows)]
pub mod windows;

pub use error::PortError;
pub use loopback::LoopbackPort;
pub use stream::{open, SerialStream};
pub use traits::*;

/// The backend for the target platform.
#[cfg(unix)]
pub type NativePort = posix::PosixPort;

/// The backend for the target platform.
#[cfg(windows)]
pub type NativePort = windows::WindowsPort;
