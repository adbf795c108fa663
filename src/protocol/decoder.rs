//! Per-byte frame decoders.
//!
//! Each decoder is a small explicit state machine that walks
//! `Idle -> ... -> Idle` one byte at a time. The dispatcher probes
//! [`Decoder::can_handle`] to pick an owner for a fresh frame and then
//! feeds the owner every byte until the frame completes or errors.
//!
//! This module holds the trait and the fixed-shape decoders (analog,
//! digital, protocol version); the variable-length sysex family lives in
//! [`super::sysex`].

use crate::core::{Error, Result};
use super::codec::{unpack14, unpack_port};
use super::message::InboundMessage;

/// Outcome of feeding one byte to a decoder
#[derive(Debug)]
pub enum Step {
    /// Byte consumed, frame still in progress
    Continue,
    /// A message completed mid-frame; the decoder keeps the stream
    Emit(InboundMessage),
    /// Frame finished; ownership reverts to the dispatcher
    Complete(Option<InboundMessage>),
}

/// A per-message-kind incremental decoder
pub trait Decoder: Send {
    /// Whether this decoder accepts the byte in its current state.
    /// From `Idle` this tests the frame's first byte; decoders that have
    /// started a frame accept payload bytes unconditionally except where
    /// the resynchronization rules say otherwise.
    fn can_handle(&self, byte: u8) -> bool;

    /// Consumes one byte. A byte that `can_handle` rejects is a decode
    /// error: the decoder resets to `Idle` and no partial message is
    /// ever emitted.
    fn handle(&mut self, byte: u8) -> Result<Step>;

    /// Forces the decoder back to `Idle`
    fn reset(&mut self);
}

/// Decoder for analog value reports, opcodes 0xE0-0xEF
#[derive(Debug, Default)]
pub struct AnalogDecoder {
    state: AnalogState,
}

#[derive(Debug, Default)]
enum AnalogState {
    #[default]
    Idle,
    Lsb {
        channel: u8,
    },
    Msb {
        channel: u8,
        lsb: u8,
    },
}

impl Decoder for AnalogDecoder {
    fn can_handle(&self, byte: u8) -> bool {
        match self.state {
            AnalogState::Idle => byte & super::MESSAGE_TYPE_MASK == super::ANALOG_MESSAGE,
            _ => true,
        }
    }

    fn handle(&mut self, byte: u8) -> Result<Step> {
        if !self.can_handle(byte) {
            self.reset();
            return Err(Error::decode(format!("unexpected byte {:#04x} in analog message", byte)));
        }

        match self.state {
            AnalogState::Idle => {
                self.state = AnalogState::Lsb { channel: byte & super::MESSAGE_PIN_MASK };
                Ok(Step::Continue)
            }
            AnalogState::Lsb { channel } => {
                self.state = AnalogState::Msb { channel, lsb: byte };
                Ok(Step::Continue)
            }
            AnalogState::Msb { channel, lsb } => {
                let value = unpack14(lsb, byte);
                self.state = AnalogState::Idle;
                Ok(Step::Complete(Some(InboundMessage::Analog { channel, value })))
            }
        }
    }

    fn reset(&mut self) {
        self.state = AnalogState::Idle;
    }
}

/// Decoder for digital port reports, opcodes 0x90-0x9F
#[derive(Debug, Default)]
pub struct DigitalDecoder {
    state: DigitalState,
}

#[derive(Debug, Default)]
enum DigitalState {
    #[default]
    Idle,
    Lsb {
        port: u8,
    },
    Msb {
        port: u8,
        lsb: u8,
    },
}

impl Decoder for DigitalDecoder {
    fn can_handle(&self, byte: u8) -> bool {
        match self.state {
            DigitalState::Idle => byte & super::MESSAGE_TYPE_MASK == super::DIGITAL_MESSAGE,
            _ => true,
        }
    }

    fn handle(&mut self, byte: u8) -> Result<Step> {
        if !self.can_handle(byte) {
            self.reset();
            return Err(Error::decode(format!("unexpected byte {:#04x} in digital message", byte)));
        }

        match self.state {
            DigitalState::Idle => {
                self.state = DigitalState::Lsb { port: byte & super::MESSAGE_PIN_MASK };
                Ok(Step::Continue)
            }
            DigitalState::Lsb { port } => {
                self.state = DigitalState::Msb { port, lsb: byte };
                Ok(Step::Continue)
            }
            DigitalState::Msb { port, lsb } => {
                // Only the low 8 of the 14 bits carry pin states
                let pins = unpack_port(unpack14(lsb, byte) as u8);
                self.state = DigitalState::Idle;
                Ok(Step::Complete(Some(InboundMessage::Digital { port, pins })))
            }
        }
    }

    fn reset(&mut self) {
        self.state = DigitalState::Idle;
    }
}

/// Decoder for the protocol version report, opcode 0xF9
#[derive(Debug, Default)]
pub struct ProtocolVersionDecoder {
    state: VersionState,
}

#[derive(Debug, Default)]
enum VersionState {
    #[default]
    Idle,
    Major,
    Minor {
        major: u8,
    },
}

impl Decoder for ProtocolVersionDecoder {
    fn can_handle(&self, byte: u8) -> bool {
        match self.state {
            VersionState::Idle => byte == super::PROTOCOL_VERSION,
            _ => true,
        }
    }

    fn handle(&mut self, byte: u8) -> Result<Step> {
        if !self.can_handle(byte) {
            self.reset();
            return Err(Error::decode(format!(
                "unexpected byte {:#04x} in protocol version message",
                byte
            )));
        }

        match self.state {
            VersionState::Idle => {
                self.state = VersionState::Major;
                Ok(Step::Continue)
            }
            VersionState::Major => {
                if byte > 127 {
                    self.reset();
                    return Err(Error::decode("protocol major version must be < 128"));
                }
                self.state = VersionState::Minor { major: byte };
                Ok(Step::Continue)
            }
            VersionState::Minor { major } => {
                if byte > 127 {
                    self.reset();
                    return Err(Error::decode("protocol minor version must be < 128"));
                }
                self.state = VersionState::Idle;
                Ok(Step::Complete(Some(InboundMessage::ProtocolVersion { major, minor: byte })))
            }
        }
    }

    fn reset(&mut self) {
        self.state = VersionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds a full frame, expecting the last byte to complete it
    fn decode_frame(decoder: &mut dyn Decoder, bytes: &[u8]) -> InboundMessage {
        let (last, head) = bytes.split_last().unwrap();
        for &byte in head {
            assert!(decoder.can_handle(byte));
            assert!(matches!(decoder.handle(byte).unwrap(), Step::Continue | Step::Emit(_)));
        }
        match decoder.handle(*last).unwrap() {
            Step::Complete(Some(message)) => message,
            other => panic!("expected completed message, got {:?}", other),
        }
    }

    #[test]
    fn test_analog_round_trip() {
        let mut decoder = AnalogDecoder::default();
        let message = decode_frame(&mut decoder, &[0xE3, 0x2C, 0x02]);
        assert_eq!(message, InboundMessage::Analog { channel: 3, value: 300 });

        // Decoder is reusable after a completed frame
        let message = decode_frame(&mut decoder, &[0xE0, 0x00, 0x00]);
        assert_eq!(message, InboundMessage::Analog { channel: 0, value: 0 });
    }

    #[test]
    fn test_analog_rejects_foreign_start() {
        let mut decoder = AnalogDecoder::default();
        assert!(!decoder.can_handle(0x90));
        assert!(decoder.handle(0x90).is_err());
        assert!(decoder.can_handle(0xE5));
    }

    #[test]
    fn test_digital_round_trip() {
        let mut decoder = DigitalDecoder::default();
        let message = decode_frame(&mut decoder, &[0x91, 0x01, 0x01]);
        let mut pins = [false; 8];
        pins[0] = true;
        pins[7] = true;
        assert_eq!(message, InboundMessage::Digital { port: 1, pins });
    }

    #[test]
    fn test_protocol_version_round_trip() {
        let mut decoder = ProtocolVersionDecoder::default();
        let message = decode_frame(&mut decoder, &[0xF9, 2, 3]);
        assert_eq!(message, InboundMessage::ProtocolVersion { major: 2, minor: 3 });
    }

    #[test]
    fn test_protocol_version_rejects_high_component() {
        let mut decoder = ProtocolVersionDecoder::default();
        assert!(matches!(decoder.handle(0xF9).unwrap(), Step::Continue));
        assert!(decoder.handle(0x80).is_err());
        // Error resets the decoder back to Idle
        assert!(decoder.can_handle(0xF9));
    }
}
