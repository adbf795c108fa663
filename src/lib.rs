//! Firmata host engine: drive and query a microcontroller's pins over a
//! byte-oriented serial link.
//!
//! The crate decodes the Firmata wire protocol incrementally from an
//! arbitrary-width byte stream, encodes canonical outbound frames,
//! routes decoded messages to typed subscribers, and runs the discovery
//! handshake that makes a freshly connected board usable.

pub mod core;
pub mod protocol;
pub mod transport;

mod board;

// Re-export commonly used items
pub use self::board::Board;
pub use self::core::{BoardConfig, Error, Firmware, LinkStatus, Pin, PinMode, Result};
pub use self::protocol::{InboundMessage, MessageKind, OutboundMessage};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
