//! In-memory loopback ports.
//!
//! `pair()` returns two ports wired like a null-modem cable: bytes written to
//! one are read, in order, from the other. Reads block the same way a real
//! port does, which makes the pair useful for exercising stream code without
//! hardware.
//!
//! # Example
//! ```
//! use serial_stream::port::{loopback, SerialBackend};
//!
//! let (a, b) = loopback::pair("LOOP0", "LOOP1");
//! a.write(b"Hello, World!").unwrap();
//!
//! let mut buffer = [0u8; 32];
//! let n = b.read(&mut buffer).unwrap();
//! assert_eq!(&buffer[..n], b"Hello, World!");
//! ```

use super::error::PortError;
use super::traits::SerialBackend;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct PipeState {
    bytes: VecDeque<u8>,
    /// Set once either end closes.
    hung_up: bool,
}

/// One direction of the cable.
#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
}

impl Pipe {
    fn hang_up(&self) {
        self.state.lock().hung_up = true;
        self.readable.notify_all();
    }
}

/// One end of a loopback pair.
#[derive(Debug)]
pub struct LoopbackPort {
    name: String,
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
    closed: AtomicBool,
    /// Zero blocks forever.
    timeout_ms: AtomicU32,
}

/// Create two connected ports.
pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (LoopbackPort, LoopbackPort) {
    let a_to_b = Arc::new(Pipe::default());
    let b_to_a = Arc::new(Pipe::default());
    (
        LoopbackPort::new(a.into(), Arc::clone(&b_to_a), Arc::clone(&a_to_b)),
        LoopbackPort::new(b.into(), a_to_b, b_to_a),
    )
}

impl LoopbackPort {
    fn new(name: String, inbound: Arc<Pipe>, outbound: Arc<Pipe>) -> Self {
        Self {
            name,
            inbound,
            outbound,
            closed: AtomicBool::new(false),
            timeout_ms: AtomicU32::new(0),
        }
    }

    /// Bytes waiting to be read on this end.
    pub fn available_bytes(&self) -> usize {
        self.inbound.state.lock().bytes.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), PortError> {
        if self.is_closed() {
            Err(PortError::AlreadyClosed)
        } else {
            Ok(())
        }
    }
}

impl SerialBackend for LoopbackPort {
    fn read(&self, buffer: &mut [u8]) -> Result<usize, PortError> {
        self.ensure_open()?;
        if buffer.is_empty() {
            return Ok(0);
        }

        let deadline = match self.timeout_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Instant::now() + Duration::from_millis(u64::from(ms))),
        };

        let mut state = self.inbound.state.lock();
        while state.bytes.is_empty() && !state.hung_up {
            match deadline {
                Some(deadline) => {
                    if self.inbound.readable.wait_until(&mut state, deadline).timed_out() {
                        return Ok(0);
                    }
                }
                None => self.inbound.readable.wait(&mut state),
            }
        }
        // Our own close also hangs up the pipe.
        self.ensure_open()?;

        let n = buffer.len().min(state.bytes.len());
        for (slot, byte) in buffer.iter_mut().zip(state.bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&self, data: &[u8]) -> Result<usize, PortError> {
        self.ensure_open()?;
        let mut state = self.outbound.state.lock();
        if state.hung_up {
            return Err(PortError::NativeIo(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        state.bytes.extend(data);
        drop(state);
        self.outbound.readable.notify_all();
        Ok(data.len())
    }

    fn close(&self) -> Result<(), PortError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(PortError::AlreadyClosed);
        }
        self.inbound.hang_up();
        self.outbound.hang_up();
        Ok(())
    }

    fn set_timeout(&self, timeout_ms: u32) -> Result<(), PortError> {
        self.ensure_open()?;
        self.timeout_ms.store(timeout_ms, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_write_then_read() {
        let (a, b) = pair("A", "B");
        a.write(b"Hello").unwrap();

        let mut buffer = [0u8; 10];
        let n = b.read(&mut buffer).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buffer[..n], b"Hello");
    }

    #[test]
    fn test_directions_are_independent() {
        let (a, b) = pair("A", "B");
        a.write(b"to-b").unwrap();
        b.write(b"to-a").unwrap();

        let mut buffer = [0u8; 10];
        let n = a.read(&mut buffer).unwrap();
        assert_eq!(&buffer[..n], b"to-a");
        let n = b.read(&mut buffer).unwrap();
        assert_eq!(&buffer[..n], b"to-b");
    }

    #[test]
    fn test_partial_read() {
        let (a, b) = pair("A", "B");
        a.write(b"Hello, World!").unwrap();

        let mut buffer = [0u8; 5];
        let n = b.read(&mut buffer).unwrap();
        assert_eq!(&buffer[..n], b"Hello");
        assert_eq!(b.available_bytes(), 8);
    }

    #[test]
    fn test_read_blocks_until_data() {
        let (a, b) = pair("A", "B");
        let reader = thread::spawn(move || {
            let mut buffer = [0u8; 4];
            let n = b.read(&mut buffer).unwrap();
            buffer[..n].to_vec()
        });
        thread::sleep(Duration::from_millis(50));
        a.write(b"late").unwrap();
        assert_eq!(reader.join().unwrap(), b"late");
    }

    #[test]
    fn test_timeout_returns_zero() {
        let (_a, b) = pair("A", "B");
        b.set_timeout(50).unwrap();

        let started = Instant::now();
        let mut buffer = [0u8; 4];
        assert_eq!(b.read(&mut buffer).unwrap(), 0);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_timeout_not_extended_by_empty_wakeups() {
        let (a, b) = pair("A", "B");
        b.set_timeout(100).unwrap();

        thread::scope(|s| {
            s.spawn(|| {
                // Empty writes wake the reader without giving it data.
                for _ in 0..20 {
                    a.write(b"").unwrap();
                    thread::sleep(Duration::from_millis(20));
                }
            });

            let started = Instant::now();
            let mut buffer = [0u8; 4];
            assert_eq!(b.read(&mut buffer).unwrap(), 0);
            assert!(started.elapsed() < Duration::from_millis(300));
        });
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let (a, b) = pair("A", "B");
        let b = Arc::new(b);
        let reader = {
            let b = Arc::clone(&b);
            thread::spawn(move || {
                let mut buffer = [0u8; 4];
                b.read(&mut buffer)
            })
        };
        thread::sleep(Duration::from_millis(50));
        a.close().unwrap();
        assert_eq!(reader.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn test_write_after_peer_close_is_broken_pipe() {
        let (a, b) = pair("A", "B");
        b.close().unwrap();
        match a.write(b"x") {
            Err(PortError::NativeIo(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("Expected broken pipe, got: {:?}", other),
        }
    }

    #[test]
    fn test_operations_after_close() {
        let (a, _b) = pair("A", "B");
        a.close().unwrap();

        let mut buffer = [0u8; 4];
        assert!(matches!(a.read(&mut buffer), Err(PortError::AlreadyClosed)));
        assert!(matches!(a.write(b"x"), Err(PortError::AlreadyClosed)));
        assert!(matches!(a.close(), Err(PortError::AlreadyClosed)));
        assert!(matches!(a.set_timeout(10), Err(PortError::AlreadyClosed)));
    }
}
