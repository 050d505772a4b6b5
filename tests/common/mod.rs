//! Shared test utilities for serial-stream integration tests.

#![allow(dead_code)]

use serial_stream::port::{PortError, SerialBackend, SerialStream};

/// A deterministic payload that avoids control characters.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'A' + (i % 26) as u8).collect()
}

/// Read from `stream` until exactly `len` bytes have arrived.
pub fn read_exactly<B: SerialBackend>(
    stream: &SerialStream<B>,
    len: usize,
) -> Result<Vec<u8>, PortError> {
    let mut received = Vec::with_capacity(len);
    let mut buffer = [0u8; 97];
    while received.len() < len {
        let want = (len - received.len()).min(buffer.len());
        let n = stream.read(&mut buffer[..want])?;
        received.extend_from_slice(&buffer[..n]);
    }
    Ok(received)
}

#[cfg(target_os = "linux")]
pub mod pty {
    use std::ffi::CStr;
    use std::fs::File;
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd};

    /// The controlling side of a pseudo-terminal plus the path of its
    /// terminal side, which behaves like a serial device.
    pub struct PtyPair {
        pub master: File,
        pub slave_path: String,
    }

    pub fn open_pty() -> PtyPair {
        unsafe {
            let fd = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            assert!(fd >= 0, "posix_openpt failed: {}", io::Error::last_os_error());
            let master = File::from_raw_fd(fd);
            assert_eq!(libc::grantpt(master.as_raw_fd()), 0, "grantpt failed");
            assert_eq!(libc::unlockpt(master.as_raw_fd()), 0, "unlockpt failed");

            let mut name = [0 as libc::c_char; 128];
            assert_eq!(
                libc::ptsname_r(master.as_raw_fd(), name.as_mut_ptr(), name.len()),
                0,
                "ptsname_r failed"
            );
            let slave_path = CStr::from_ptr(name.as_ptr()).to_string_lossy().into_owned();
            PtyPair { master, slave_path }
        }
    }
}
