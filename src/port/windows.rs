//! Windows serial port backend.
//!
//! The port is opened for overlapped I/O. Each direction owns a manual-reset
//! event and an `OVERLAPPED` block behind its own mutex, so a read and a write
//! can be in flight at once while same-direction calls queue up. Blocking
//! semantics are rebuilt on top by waiting for the overlapped result.

use super::error::PortError;
use super::traits::{PortConfiguration, SerialBackend};
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::io;
use std::iter;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{FromRawHandle, IntoRawHandle, OwnedHandle, RawHandle};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use tracing::{debug, info};
use winapi::shared::minwindef::{BOOL, DWORD, FALSE, TRUE};
use winapi::shared::winerror::{ERROR_IO_PENDING, ERROR_SEM_TIMEOUT, ERROR_TIMEOUT, WAIT_TIMEOUT};
use winapi::um::commapi::{SetCommMask, SetCommState, SetCommTimeouts, SetupComm};
use winapi::um::fileapi::{CreateFileW, ReadFile, WriteFile, OPEN_EXISTING};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::ioapiset::GetOverlappedResult;
use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::synchapi::{CreateEventW, ResetEvent};
use winapi::um::winbase::{
    COMMTIMEOUTS, DCB, DTR_CONTROL_ENABLE, DTR_CONTROL_HANDSHAKE, EV_RXCHAR,
    FILE_FLAG_OVERLAPPED, ONESTOPBIT, RTS_CONTROL_ENABLE, RTS_CONTROL_HANDSHAKE, TWOSTOPBITS,
};
use winapi::um::winnt::{FILE_ATTRIBUTE_NORMAL, GENERIC_READ, GENERIC_WRITE, HANDLE};

/// Driver queue size requested for each direction.
const QUEUE_SIZE: DWORD = 64;

/// Build the DCB for `config`.
///
/// Any non-zero baud rate is passed through; the driver decides whether it
/// can honour it. Parity is written as its numeric code, including MARK and
/// SPACE.
pub fn comm_state(config: &PortConfiguration) -> Result<DCB, PortError> {
    if config.baud == 0 {
        return Err(PortError::UnsupportedBaudRate(0));
    }

    let mut dcb = DCB {
        DCBlength: mem::size_of::<DCB>() as DWORD,
        BaudRate: config.baud,
        ByteSize: config.effective_byte_size(),
        Parity: config.parity.code(),
        StopBits: if config.effective_stop_bits() == 2 {
            TWOSTOPBITS
        } else {
            ONESTOPBIT
        },
        ..DCB::default()
    };

    dcb.set_fBinary(TRUE as DWORD);
    // A disabled line is left to handshaking rather than forced low.
    dcb.set_fDtrControl(if config.dtr_flow_control {
        DTR_CONTROL_ENABLE
    } else {
        DTR_CONTROL_HANDSHAKE
    });
    dcb.set_fRtsControl(if config.rts_flow_control {
        RTS_CONTROL_ENABLE
    } else {
        RTS_CONTROL_HANDSHAKE
    });
    if config.xon_flow_control {
        dcb.set_fOutX(TRUE as DWORD);
        dcb.set_fInX(TRUE as DWORD);
    }

    Ok(dcb)
}

/// Timeout block for a read/write timeout of `timeout_ms`.
///
/// Zero disables every timeout: a read then completes only once the whole
/// buffer is filled, so interactive callers should pass a non-zero value.
pub fn comm_timeouts(timeout_ms: u32) -> COMMTIMEOUTS {
    COMMTIMEOUTS {
        ReadIntervalTimeout: timeout_ms / 10,
        ReadTotalTimeoutMultiplier: 0,
        ReadTotalTimeoutConstant: timeout_ms,
        WriteTotalTimeoutMultiplier: 0,
        WriteTotalTimeoutConstant: timeout_ms,
    }
}

/// Prefix bare names with `\\.\` so ports above COM9 resolve.
pub fn device_path(name: &str) -> String {
    if name.starts_with('\\') {
        name.to_string()
    } else {
        format!(r"\\.\{name}")
    }
}

fn check(ret: BOOL, call: &'static str) -> Result<(), PortError> {
    if ret == FALSE {
        Err(PortError::native_configuration(call))
    } else {
        Ok(())
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error().map(|code| code as DWORD),
        Some(ERROR_SEM_TIMEOUT | WAIT_TIMEOUT | ERROR_TIMEOUT)
    )
}

/// Completion state for one direction.
struct Direction {
    overlapped: OVERLAPPED,
    _event: OwnedHandle,
}

// SAFETY: the raw pointers inside OVERLAPPED refer to the event handle owned
// alongside it, and access is serialised by the enclosing mutex.
unsafe impl Send for Direction {}

impl Direction {
    fn new() -> Result<Self, PortError> {
        // SAFETY: manual-reset, initially unsignalled, unnamed event.
        let event = unsafe { CreateEventW(ptr::null_mut(), TRUE, FALSE, ptr::null()) };
        if event.is_null() {
            return Err(PortError::native_configuration("CreateEventW"));
        }
        let mut overlapped = OVERLAPPED::default();
        overlapped.hEvent = event;
        Ok(Self {
            overlapped,
            // SAFETY: `event` is a fresh handle nobody else owns.
            _event: unsafe { OwnedHandle::from_raw_handle(event as RawHandle) },
        })
    }

    /// Issue one overlapped operation via `start` and wait for it to finish.
    fn transfer<F>(&mut self, handle: HANDLE, start: F) -> Result<usize, PortError>
    where
        F: FnOnce(*mut OVERLAPPED) -> BOOL,
    {
        // SAFETY: the event handle lives as long as `self`.
        if unsafe { ResetEvent(self.overlapped.hEvent) } == FALSE {
            return Err(PortError::NativeIo(io::Error::last_os_error()));
        }

        if start(&mut self.overlapped) == FALSE {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(ERROR_IO_PENDING as i32) {
                return settle(err);
            }
        }

        let mut transferred: DWORD = 0;
        // SAFETY: `overlapped` is the block the operation was started with and
        // stays in place until the wait returns.
        let ok = unsafe { GetOverlappedResult(handle, &mut self.overlapped, &mut transferred, TRUE) };
        if ok == FALSE {
            return settle(io::Error::last_os_error());
        }
        Ok(transferred as usize)
    }
}

/// Timeouts complete as an empty transfer; everything else is an error.
fn settle(err: io::Error) -> Result<usize, PortError> {
    if is_timeout(&err) {
        Ok(0)
    } else {
        Err(PortError::NativeIo(err))
    }
}

/// An open COM port.
///
/// The handle is held in an atomic, null once closed, so `close` never
/// waits on a read or write that is still pending.
pub struct WindowsPort {
    name: String,
    handle: AtomicPtr<winapi::ctypes::c_void>,
    reader: Mutex<Direction>,
    writer: Mutex<Direction>,
    timeouts: Mutex<COMMTIMEOUTS>,
}

impl WindowsPort {
    /// Open the COM port named in `config` for overlapped I/O and apply its
    /// line settings, queue sizes, event mask and timeouts.
    pub fn open(config: &PortConfiguration) -> Result<Self, PortError> {
        let mut dcb = comm_state(config)?;
        let mut timeouts = comm_timeouts(config.timeout_ms);

        let path: Vec<u16> = OsStr::new(&device_path(&config.name))
            .encode_wide()
            .chain(iter::once(0))
            .collect();

        // SAFETY: `path` is NUL-terminated UTF-16; other pointers are null.
        let raw = unsafe {
            CreateFileW(
                path.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null_mut(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL | FILE_FLAG_OVERLAPPED,
                ptr::null_mut(),
            )
        };
        if raw == INVALID_HANDLE_VALUE {
            return Err(PortError::from_open_error(
                &config.name,
                io::Error::last_os_error(),
            ));
        }
        // SAFETY: `raw` is a valid handle returned by CreateFileW.
        let handle = unsafe { OwnedHandle::from_raw_handle(raw as RawHandle) };

        debug!(
            "Configuring {}: byte_size={} parity={} stop_bits={}",
            config.name, dcb.ByteSize, dcb.Parity, dcb.StopBits
        );

        // SAFETY: `raw` stays open for the duration (owned by `handle`), and
        // the control blocks are fully initialised.
        unsafe {
            check(SetCommState(raw, &mut dcb), "SetCommState")?;
            check(SetupComm(raw, QUEUE_SIZE, QUEUE_SIZE), "SetupComm")?;
            check(SetCommMask(raw, EV_RXCHAR), "SetCommMask")?;
            check(SetCommTimeouts(raw, &mut timeouts), "SetCommTimeouts")?;
        }

        let reader = Direction::new()?;
        let writer = Direction::new()?;

        info!(
            "Opened {} at {} baud with {}ms timeout",
            config.name, config.baud, config.timeout_ms
        );

        Ok(Self {
            name: config.name.clone(),
            handle: AtomicPtr::new(handle.into_raw_handle() as HANDLE),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            timeouts: Mutex::new(timeouts),
        })
    }

    /// The timeouts most recently applied to the port.
    pub fn timeouts(&self) -> COMMTIMEOUTS {
        *self.timeouts.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.handle.load(Ordering::Acquire).is_null()
    }

    fn raw_handle(&self) -> Result<HANDLE, PortError> {
        let handle = self.handle.load(Ordering::Acquire);
        if handle.is_null() {
            Err(PortError::AlreadyClosed)
        } else {
            Ok(handle)
        }
    }
}

impl SerialBackend for WindowsPort {
    fn read(&self, buffer: &mut [u8]) -> Result<usize, PortError> {
        let handle = self.raw_handle()?;
        let len = buffer.len().min(DWORD::MAX as usize) as DWORD;

        let mut reader = self.reader.lock();
        reader.transfer(handle, |overlapped| {
            // SAFETY: `buffer` outlives the call, which waits for completion.
            unsafe { ReadFile(handle, buffer.as_mut_ptr().cast(), len, ptr::null_mut(), overlapped) }
        })
    }

    fn write(&self, data: &[u8]) -> Result<usize, PortError> {
        let handle = self.raw_handle()?;
        let len = data.len().min(DWORD::MAX as usize) as DWORD;

        let mut writer = self.writer.lock();
        writer.transfer(handle, |overlapped| {
            // SAFETY: `data` outlives the call, which waits for completion.
            unsafe { WriteFile(handle, data.as_ptr() as *const _, len, ptr::null_mut(), overlapped) }
        })
    }

    fn close(&self) -> Result<(), PortError> {
        let handle = self.handle.swap(ptr::null_mut(), Ordering::AcqRel);
        if handle.is_null() {
            return Err(PortError::AlreadyClosed);
        }
        debug!("Closing {}", self.name);
        // SAFETY: the swap above made this the only owner of `handle`. Pending
        // overlapped operations on it complete with an error.
        if unsafe { CloseHandle(handle) } == FALSE {
            return Err(PortError::NativeIo(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Store and reapply the timeouts.
    ///
    /// Operations already waiting keep the timeouts they started with; the
    /// new values govern the next read or write.
    fn set_timeout(&self, timeout_ms: u32) -> Result<(), PortError> {
        let handle = self.raw_handle()?;

        let mut timeouts = self.timeouts.lock();
        *timeouts = comm_timeouts(timeout_ms);
        // SAFETY: a handle closed since the load fails the call with an error.
        check(unsafe { SetCommTimeouts(handle, &mut *timeouts) }, "SetCommTimeouts")?;
        debug!("Set {}ms timeout on {}", timeout_ms, self.name);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for WindowsPort {
    fn drop(&mut self) {
        let handle = *self.handle.get_mut();
        if !handle.is_null() {
            // SAFETY: an unclosed handle is still owned by this port.
            drop(unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) });
        }
    }
}

impl std::fmt::Debug for WindowsPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsPort")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::traits::Parity;

    fn base() -> PortConfiguration {
        PortConfiguration::new("COM3", 230400)
    }

    #[test]
    fn test_any_positive_baud_passes_through() {
        let dcb = comm_state(&base()).unwrap();
        assert_eq!(dcb.BaudRate, 230400);
        assert_eq!(dcb.DCBlength as usize, mem::size_of::<DCB>());
        assert_eq!(dcb.fBinary(), 1);
    }

    #[test]
    fn test_zero_baud_rejected() {
        let err = comm_state(&PortConfiguration::new("COM3", 0)).unwrap_err();
        assert!(matches!(err, PortError::UnsupportedBaudRate(0)));
    }

    #[test]
    fn test_byte_size_defaults_to_eight() {
        for size in 5..=8 {
            assert_eq!(comm_state(&base().with_byte_size(size)).unwrap().ByteSize, size);
        }
        assert_eq!(comm_state(&base().with_byte_size(0)).unwrap().ByteSize, 8);
    }

    #[test]
    fn test_parity_code_passes_through() {
        for parity in [Parity::None, Parity::Odd, Parity::Even, Parity::Mark, Parity::Space] {
            assert_eq!(comm_state(&base().with_parity(parity)).unwrap().Parity, parity.code());
        }
    }

    #[test]
    fn test_stop_bits_codes() {
        assert_eq!(comm_state(&base().with_stop_bits(0)).unwrap().StopBits, ONESTOPBIT);
        assert_eq!(comm_state(&base().with_stop_bits(1)).unwrap().StopBits, ONESTOPBIT);
        assert_eq!(comm_state(&base().with_stop_bits(2)).unwrap().StopBits, TWOSTOPBITS);
    }

    #[test]
    fn test_line_control_defaults_to_handshake() {
        let dcb = comm_state(&base()).unwrap();
        assert_eq!(dcb.fDtrControl(), DTR_CONTROL_HANDSHAKE);
        assert_eq!(dcb.fRtsControl(), RTS_CONTROL_HANDSHAKE);
        assert_eq!(dcb.fOutX(), 0);
        assert_eq!(dcb.fInX(), 0);

        let dcb = comm_state(
            &base()
                .with_dtr_flow_control(true)
                .with_rts_flow_control(true)
                .with_xon_flow_control(true),
        )
        .unwrap();
        assert_eq!(dcb.fDtrControl(), DTR_CONTROL_ENABLE);
        assert_eq!(dcb.fRtsControl(), RTS_CONTROL_ENABLE);
        assert_eq!(dcb.fOutX(), 1);
        assert_eq!(dcb.fInX(), 1);
    }

    #[test]
    fn test_timeouts() {
        let t = comm_timeouts(500);
        assert_eq!(t.ReadIntervalTimeout, 50);
        assert_eq!(t.ReadTotalTimeoutConstant, 500);
        assert_eq!(t.WriteTotalTimeoutConstant, 500);

        let t = comm_timeouts(0);
        assert_eq!(t.ReadIntervalTimeout, 0);
        assert_eq!(t.ReadTotalTimeoutConstant, 0);
    }

    #[test]
    fn test_device_path() {
        assert_eq!(device_path("COM12"), r"\\.\COM12");
        assert_eq!(device_path(r"\\.\COM1"), r"\\.\COM1");
    }

    #[test]
    fn test_missing_port_not_found() {
        let err = WindowsPort::open(&PortConfiguration::new("COM250", 9600)).unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }
}
