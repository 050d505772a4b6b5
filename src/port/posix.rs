//! POSIX serial port backend.
//!
//! Translates a `PortConfiguration` into termios flags and drives a single
//! blocking file descriptor. Reads and writes touch disjoint kernel buffers,
//! so no user-space locking is needed between the two directions.

use super::error::PortError;
use super::traits::{Parity, PortConfiguration, SerialBackend};
use std::ffi::CString;
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, info};

/// Baud rates this backend can express, ascending.
pub const SUPPORTED_BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

/// Look up the termios speed constant for an exact baud rate.
pub fn baud_speed(baud: u32) -> Result<libc::speed_t, PortError> {
    match baud {
        9600 => Ok(libc::B9600),
        19200 => Ok(libc::B19200),
        38400 => Ok(libc::B38400),
        57600 => Ok(libc::B57600),
        115200 => Ok(libc::B115200),
        other => Err(PortError::UnsupportedBaudRate(other)),
    }
}

fn character_size(byte_size: u8) -> libc::tcflag_t {
    match byte_size {
        5 => libc::CS5,
        6 => libc::CS6,
        7 => libc::CS7,
        _ => libc::CS8,
    }
}

/// Derive the termios control block for `config`, starting from `termios`
/// (normally what `tcgetattr` returned for the device).
///
/// This only rewrites the struct; nothing is applied to a descriptor.
/// MARK and SPACE parity have no portable termios encoding and are rejected.
pub fn termios_for(
    config: &PortConfiguration,
    mut termios: libc::termios,
) -> Result<libc::termios, PortError> {
    let speed = baud_speed(config.baud)?;

    // Local line, receiver on.
    termios.c_cflag |= libc::CLOCAL | libc::CREAD;

    termios.c_cflag &= !libc::CSIZE;
    termios.c_cflag |= character_size(config.effective_byte_size());

    match config.parity {
        Parity::None => termios.c_cflag &= !(libc::PARENB | libc::PARODD),
        Parity::Odd => termios.c_cflag |= libc::PARENB | libc::PARODD,
        Parity::Even => {
            termios.c_cflag |= libc::PARENB;
            termios.c_cflag &= !libc::PARODD;
        }
        Parity::Mark | Parity::Space => return Err(PortError::UnsupportedParity(config.parity)),
    }

    if config.effective_stop_bits() == 2 {
        termios.c_cflag |= libc::CSTOPB;
    } else {
        termios.c_cflag &= !libc::CSTOPB;
    }

    // Raw byte semantics in both directions.
    termios.c_lflag &=
        !(libc::ICANON | libc::ECHO | libc::ECHOE | libc::ECHONL | libc::ISIG | libc::IEXTEN);
    termios.c_iflag &= !(libc::INLCR | libc::IGNCR | libc::ICRNL | libc::ISTRIP);
    termios.c_oflag &= !libc::OPOST;

    if config.rts_flow_control {
        termios.c_cflag |= libc::CRTSCTS;
    } else {
        termios.c_cflag &= !libc::CRTSCTS;
    }
    if config.xon_flow_control {
        termios.c_iflag |= libc::IXON | libc::IXOFF | libc::IXANY;
    } else {
        termios.c_iflag &= !(libc::IXON | libc::IXOFF | libc::IXANY);
    }
    // dtr_flow_control has no termios equivalent.

    // Block until at least one byte, no inter-byte timer.
    termios.c_cc[libc::VMIN] = 1;
    termios.c_cc[libc::VTIME] = 0;

    // SAFETY: both calls only write into the struct we own.
    unsafe {
        if libc::cfsetispeed(&mut termios, speed) != 0 {
            return Err(PortError::native_configuration("cfsetispeed"));
        }
        if libc::cfsetospeed(&mut termios, speed) != 0 {
            return Err(PortError::native_configuration("cfsetospeed"));
        }
    }

    Ok(termios)
}

fn check(ret: libc::c_int, call: &'static str) -> Result<libc::c_int, PortError> {
    if ret == -1 {
        Err(PortError::native_configuration(call))
    } else {
        Ok(ret)
    }
}

/// Descriptor value once the port has been closed.
const CLOSED: RawFd = -1;

/// An open terminal device.
///
/// The raw descriptor is held in an atomic so `close` never waits on reads
/// or writes in flight. A call that loaded the descriptor before `close`
/// swapped it out fails with the native `EBADF`.
pub struct PosixPort {
    name: String,
    fd: AtomicI32,
}

impl PosixPort {
    /// Open and configure the terminal device named in `config`.
    ///
    /// The configuration is validated before any system call is made. The
    /// device is opened non-blocking so a missing carrier cannot hang the
    /// open, then switched back to blocking once its attributes are set.
    pub fn open(config: &PortConfiguration) -> Result<Self, PortError> {
        baud_speed(config.baud)?;
        if matches!(config.parity, Parity::Mark | Parity::Space) {
            return Err(PortError::UnsupportedParity(config.parity));
        }

        let path = CString::new(config.name.as_bytes())
            .map_err(|_| PortError::NotFound(config.name.clone()))?;

        // SAFETY: `path` is a valid NUL-terminated string.
        let raw = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        if raw == -1 {
            return Err(PortError::from_open_error(
                &config.name,
                io::Error::last_os_error(),
            ));
        }
        // SAFETY: `raw` was just returned by open and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: isatty only inspects the descriptor.
        if unsafe { libc::isatty(fd.as_raw_fd()) } != 1 {
            return Err(PortError::NotATerminal(config.name.clone()));
        }

        let mut current = MaybeUninit::<libc::termios>::uninit();
        // SAFETY: tcgetattr fully initialises `current` when it returns 0.
        let current = unsafe {
            check(libc::tcgetattr(fd.as_raw_fd(), current.as_mut_ptr()), "tcgetattr")?;
            current.assume_init()
        };

        let termios = termios_for(config, current)?;
        // SAFETY: `termios` is a fully initialised control block.
        check(
            unsafe { libc::tcsetattr(fd.as_raw_fd(), libc::TCSANOW, &termios) },
            "tcsetattr",
        )?;

        // SAFETY: plain fcntl flag manipulation on a descriptor we own.
        unsafe {
            let flags = check(libc::fcntl(fd.as_raw_fd(), libc::F_GETFL), "fcntl(F_GETFL)")?;
            check(
                libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags & !libc::O_NONBLOCK),
                "fcntl(F_SETFL)",
            )?;
        }

        info!(
            "Opened {} at {} baud, {} data bits, {} parity, {} stop bits",
            config.name,
            config.baud,
            config.effective_byte_size(),
            config.parity,
            config.effective_stop_bits()
        );

        Ok(Self {
            name: config.name.clone(),
            fd: AtomicI32::new(fd.into_raw_fd()),
        })
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.fd.load(Ordering::Acquire) == CLOSED
    }

    fn raw_fd(&self) -> Result<RawFd, PortError> {
        match self.fd.load(Ordering::Acquire) {
            CLOSED => Err(PortError::AlreadyClosed),
            fd => Ok(fd),
        }
    }
}

impl SerialBackend for PosixPort {
    fn read(&self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let fd = self.raw_fd()?;
        loop {
            // SAFETY: the pointer and length describe `buffer`.
            let n = unsafe { libc::read(fd, buffer.as_mut_ptr().cast(), buffer.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(PortError::NativeIo(err));
            }
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize, PortError> {
        let fd = self.raw_fd()?;
        loop {
            // SAFETY: the pointer and length describe `data`.
            let n = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(PortError::NativeIo(err));
            }
        }
    }

    fn close(&self) -> Result<(), PortError> {
        let fd = match self.fd.swap(CLOSED, Ordering::AcqRel) {
            CLOSED => return Err(PortError::AlreadyClosed),
            fd => fd,
        };
        debug!("Closing {}", self.name);
        // SAFETY: the swap above made this the only owner of `fd`.
        if unsafe { libc::close(fd) } == -1 {
            return Err(PortError::NativeIo(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn set_timeout(&self, timeout_ms: u32) -> Result<(), PortError> {
        debug!("Ignoring {}ms timeout on {}: not supported on POSIX", timeout_ms, self.name);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PosixPort {
    fn drop(&mut self) {
        let fd = *self.fd.get_mut();
        if fd != CLOSED {
            // SAFETY: an unclosed descriptor is still owned by this port.
            drop(unsafe { OwnedFd::from_raw_fd(fd) });
        }
    }
}

impl std::fmt::Debug for PosixPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PosixPort")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
