//! Byte-duplex channels to a Firmata board.
//!
//! A transport is anything that can move raw bytes both ways: a serial
//! port, a TCP socket to a network bridge, or an in-memory loopback for
//! tests. The engine only ever sees these traits; swapping the physical
//! link never touches protocol code.

pub mod loopback;
pub mod serial;
pub mod tcp;

pub use self::loopback::LoopbackTransport;
pub use self::serial::SerialTransport;
pub use self::tcp::TcpTransport;

use crate::core::Result;

/// How long a blocked read waits before reporting "nothing yet"
pub(crate) const READ_TIMEOUT_MS: u64 = 100;

/// A byte-duplex channel that can be opened into its two directions
pub trait Transport: Send {
    /// Opens the channel, yielding its read and write halves. The
    /// halves live on separate threads: one drains incoming bytes, one
    /// is the single writer on the wire.
    fn open(&mut self) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)>;
}

/// The incoming-bytes half of a transport
pub trait TransportReader: Send {
    /// Reads available bytes into `buf`, blocking at most briefly.
    /// `Ok(0)` means nothing has arrived yet; an error means the link
    /// is gone for good.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// The outgoing-bytes half of a transport
pub trait TransportWriter: Send {
    /// Writes a whole frame to the wire
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
}
