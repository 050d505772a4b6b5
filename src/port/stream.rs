//! The public byte-stream façade.

use super::error::PortError;
use super::traits::{PortConfiguration, SerialBackend};
use super::NativePort;
use std::io;

/// A blocking byte stream over an open serial port.
///
/// All operations take `&self`, so the stream can be shared (for example in
/// an `Arc`) between a reading thread and a writing thread. Bytes are
/// delivered in write order and read in arrival order, with no relation
/// between write boundaries and read boundaries.
///
/// # Example
/// ```no_run
/// use serial_stream::port::{self, PortConfiguration};
///
/// let stream = port::open(&PortConfiguration::new("/dev/ttyUSB0", 115200))?;
/// stream.write(b"test")?;
///
/// let mut buffer = [0u8; 128];
/// let n = stream.read(&mut buffer)?;
/// println!("{:?}", &buffer[..n]);
/// stream.close()?;
/// # Ok::<(), serial_stream::port::PortError>(())
/// ```
#[derive(Debug)]
pub struct SerialStream<B: SerialBackend = NativePort> {
    backend: B,
}

/// Open the port described by `config` with the platform backend.
pub fn open(config: &PortConfiguration) -> Result<SerialStream, PortError> {
    SerialStream::<NativePort>::open(config)
}

impl SerialStream<NativePort> {
    /// Open the port described by `config` with the platform backend.
    pub fn open(config: &PortConfiguration) -> Result<Self, PortError> {
        NativePort::open(config).map(Self::from_backend)
    }
}

impl<B: SerialBackend> SerialStream<B> {
    /// Wrap an already open backend.
    pub fn from_backend(backend: B) -> Self {
        Self { backend }
    }

    /// Block until at least one byte arrives; returns how many were copied.
    ///
    /// On backends with a timeout, `Ok(0)` means the timeout elapsed first.
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize, PortError> {
        self.backend.read(buffer)
    }

    /// Block until some of `data` is accepted; returns how many bytes were.
    pub fn write(&self, data: &[u8]) -> Result<usize, PortError> {
        self.backend.write(data)
    }

    /// Write all of `data`, looping over short writes.
    pub fn write_all(&self, mut data: &[u8]) -> Result<(), PortError> {
        while !data.is_empty() {
            match self.backend.write(data)? {
                0 => return Err(PortError::NativeIo(io::Error::from(io::ErrorKind::WriteZero))),
                n => data = &data[n..],
            }
        }
        Ok(())
    }

    /// Release the port. Later calls, including a second close, fail with
    /// `PortError::AlreadyClosed`.
    pub fn close(&self) -> Result<(), PortError> {
        self.backend.close()
    }

    /// Change the read/write timeout. Only the Windows backend honours it.
    pub fn set_timeout(&self, timeout_ms: u32) -> Result<(), PortError> {
        self.backend.set_timeout(timeout_ms)
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }
}

impl<B: SerialBackend> io::Read for &SerialStream<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.backend.read(buf)?)
    }
}

impl<B: SerialBackend> io::Write for &SerialStream<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.backend.write(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<B: SerialBackend> io::Read for SerialStream<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl<B: SerialBackend> io::Write for SerialStream<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
