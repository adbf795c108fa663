//! Serial port transport.

use std::io::Read;
use std::time::Duration;

use serialport::SerialPort;

use crate::core::{Error, Result};
use super::{Transport, TransportReader, TransportWriter, READ_TIMEOUT_MS};

/// Transport over a serial port, the usual link to a Firmata board
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
}

impl SerialTransport {
    /// Creates a transport for the given device path and baud rate.
    /// Standard Firmata talks at 57600 baud.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        SerialTransport { path: path.into(), baud_rate }
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(Duration::from_millis(READ_TIMEOUT_MS))
            .open()
            .map_err(|e| Error::connection_lost(format!("failed to open {}: {}", self.path, e)))?;

        let writer = port
            .try_clone()
            .map_err(|e| Error::connection_lost(format!("failed to clone {}: {}", self.path, e)))?;

        Ok((
            Box::new(SerialReader { port }),
            Box::new(SerialWriter { port: writer }),
        ))
    }
}

struct SerialReader {
    port: Box<dyn SerialPort>,
}

impl TransportReader for SerialReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

struct SerialWriter {
    port: Box<dyn SerialPort>,
}

impl TransportWriter for SerialWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        use std::io::Write;
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }
}
