use clap::Parser;
use serial_stream::config::{Config, ConfigLoader};
use serial_stream::port::{Parity, PortConfiguration, SerialStream};
use serial_stream::logging;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

/// Timeout applied when none is configured, so a partly filled read buffer
/// is still delivered on Windows.
const STREAM_TIMEOUT_MS: u32 = 100;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Pipe stdin to a serial port and the port to stdout.",
    long_about = "Opens a serial port with the given line settings, copies everything read from stdin to the port and everything received from the port to stdout. Settings not given on the command line come from the configuration file."
)]
struct Args {
    /// Configuration file (defaults to the standard search path).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port name or alias, e.g. /dev/ttyUSB0 or COM3.
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits per frame (5-8).
    #[arg(long)]
    byte_size: Option<u8>,

    /// none, odd, even, mark or space.
    #[arg(long)]
    parity: Option<Parity>,

    /// Stop bits (1 or 2).
    #[arg(long)]
    stop_bits: Option<u8>,

    /// Enable RTS/CTS flow control.
    #[arg(long)]
    rts: bool,

    /// Enable DTR/DSR flow control (Windows only).
    #[arg(long)]
    dtr: bool,

    /// Enable XON/XOFF flow control.
    #[arg(long)]
    xon: bool,

    /// Read/write timeout in milliseconds (Windows only). Zero or unset
    /// means 100ms; without a timeout a read only returns once its buffer
    /// is full.
    #[arg(short, long)]
    timeout: Option<u32>,

    /// Log filter, e.g. "debug".
    #[arg(long)]
    log_level: Option<String>,

    /// Write the effective configuration to this file and exit.
    #[arg(long, value_name = "PATH")]
    save_config: Option<PathBuf>,
}

impl Args {
    /// Fold command-line values over the loaded configuration.
    fn apply(&self, config: &mut Config) {
        let port = &mut config.port;
        if let Some(ref name) = self.port {
            port.name = name.clone();
        }
        if let Some(baud) = self.baud {
            port.baud = baud;
        }
        if let Some(byte_size) = self.byte_size {
            port.byte_size = byte_size;
        }
        if let Some(parity) = self.parity {
            port.parity = parity;
        }
        if let Some(stop_bits) = self.stop_bits {
            port.stop_bits = stop_bits;
        }
        port.rts_flow_control |= self.rts;
        port.dtr_flow_control |= self.dtr;
        port.xon_flow_control |= self.xon;
        if let Some(timeout) = self.timeout {
            port.timeout_ms = timeout;
        }
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let mut loader = match args.config {
        Some(ref path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load().or_else(|e| {
            eprintln!("Warning: Failed to load config, using defaults: {}", e);
            ConfigLoader::with_defaults()
        })?,
    };
    args.apply(loader.config_mut());

    if let Some(ref path) = args.save_config {
        loader.save_to(path)?;
        eprintln!("Saved configuration to {}", path.display());
        return Ok(());
    }

    let config = loader.into_config();
    config.validate()?;

    logging::init(&config.logging)?;

    let port_config = with_stream_timeout(config.resolved_port());
    let stream = Arc::new(SerialStream::open(&port_config)?);
    info!("Streaming {}", stream.name());

    let reader = {
        let stream = Arc::clone(&stream);
        thread::spawn(move || copy_to_stdout(&stream))
    };

    let mut stdin = io::stdin().lock();
    io::copy(&mut stdin, &mut &*stream)?;
    info!("stdin closed");

    if let Err(e) = stream.close() {
        error!("Failed to close {}: {}", stream.name(), e);
    }
    // A reader still blocked in read() is left to process exit.
    if reader.is_finished() {
        if let Ok(Err(e)) = reader.join() {
            warn!("Reader stopped: {}", e);
        }
    }
    Ok(())
}

fn with_stream_timeout(mut port: PortConfiguration) -> PortConfiguration {
    if port.timeout_ms == 0 {
        port.timeout_ms = STREAM_TIMEOUT_MS;
    }
    port
}

fn copy_to_stdout(stream: &SerialStream) -> io::Result<()> {
    let mut buffer = [0u8; 1024];
    let mut stdout = io::stdout();
    loop {
        match stream.read(&mut buffer) {
            // Timed-out read on Windows; POSIX only returns zero on hang-up.
            Ok(0) if cfg!(windows) => continue,
            Ok(0) => return Ok(()),
            Ok(n) => {
                stdout.write_all(&buffer[..n])?;
                stdout.flush()?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
