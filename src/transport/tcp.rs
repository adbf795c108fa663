//! TCP transport for network-attached Firmata bridges.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::core::{Error, Result};
use super::{Transport, TransportReader, TransportWriter, READ_TIMEOUT_MS};

/// Transport over a TCP connection, for boards behind a serial-to-TCP
/// bridge or firmware speaking Firmata over the network
pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    /// Creates a transport for the given `host:port` address
    pub fn new(addr: impl Into<String>) -> Self {
        TcpTransport { addr: addr.into() }
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)> {
        let stream = TcpStream::connect(&self.addr)
            .map_err(|e| Error::connection_lost(format!("failed to connect to {}: {}", self.addr, e)))?;
        stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)))?;
        stream.set_nodelay(true)?;

        let writer = stream
            .try_clone()
            .map_err(|e| Error::connection_lost(format!("failed to clone stream: {}", e)))?;

        Ok((
            Box::new(TcpReader { stream }),
            Box::new(TcpWriter { stream: writer }),
        ))
    }
}

struct TcpReader {
    stream: TcpStream,
}

impl TransportReader for TcpReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream.read(buf) {
            // A zero-byte read on TCP means the peer closed the stream
            Ok(0) => Err(Error::connection_lost("peer closed the connection")),
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }
}

struct TcpWriter {
    stream: TcpStream,
}

impl TransportWriter for TcpWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }
}
