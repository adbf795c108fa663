//! Firmata protocol implementation
//!
//! This module defines the protocol messages, the frame encoders and
//! per-byte decoders, decoder dispatch, the message broker and the
//! handshake state machine.

pub mod broker;
pub mod codec;
pub mod decoder;
pub mod dispatch;
pub mod encoder;
pub mod message;
pub mod state;
pub mod sysex;

pub use self::broker::{MessageBroker, Subscription};
pub use self::decoder::{Decoder, Step};
pub use self::dispatch::DecoderDispatch;
pub use self::encoder::{encode, MessageSender};
pub use self::message::{I2cMode, InboundMessage, MessageKind, OutboundMessage};
pub use self::state::{Handshake, HandshakeStage};

// Command opcodes. The high nibble carries the command for the
// pin/port-addressed messages; the low nibble carries the pin or port.
/// Digital port report or write, 0x90-0x9F
pub const DIGITAL_MESSAGE: u8 = 0x90;
/// Toggle analog channel reporting, 0xC0-0xCF
pub const REPORT_ANALOG: u8 = 0xC0;
/// Toggle digital port reporting, 0xD0-0xDF
pub const REPORT_DIGITAL: u8 = 0xD0;
/// Analog report or PWM/servo write, 0xE0-0xEF
pub const ANALOG_MESSAGE: u8 = 0xE0;
/// Assign a pin mode
pub const SET_PIN_MODE: u8 = 0xF4;
/// Protocol version report/query
pub const PROTOCOL_VERSION: u8 = 0xF9;
/// Reset the board
pub const SYSTEM_RESET: u8 = 0xFF;
/// Start of a sysex frame
pub const SYSEX_START: u8 = 0xF0;
/// End of a sysex frame
pub const SYSEX_END: u8 = 0xF7;

/// Mask selecting the command nibble of a pin/port-addressed opcode
pub const MESSAGE_TYPE_MASK: u8 = 0xF0;
/// Mask selecting the pin/port nibble of a pin/port-addressed opcode
pub const MESSAGE_PIN_MASK: u8 = 0x0F;

// Sysex command bytes.
/// Query the analog pin mapping
pub const ANALOG_MAPPING_QUERY: u8 = 0x69;
/// Analog pin mapping response
pub const ANALOG_MAPPING_RESPONSE: u8 = 0x6A;
/// Query per-pin capabilities
pub const CAPABILITY_QUERY: u8 = 0x6B;
/// Per-pin capability response
pub const CAPABILITY_RESPONSE: u8 = 0x6C;
/// Query one pin's mode and state
pub const PIN_STATE_QUERY: u8 = 0x6D;
/// Pin mode and state response
pub const PIN_STATE_RESPONSE: u8 = 0x6E;
/// Analog write to pins beyond the 16-pin nibble range
pub const EXTENDED_ANALOG: u8 = 0x6F;
/// Configure a servo
pub const SERVO_CONFIG: u8 = 0x70;
/// Free-form string from the board
pub const STRING_DATA: u8 = 0x71;
/// I2C read/write request
pub const I2C_REQUEST: u8 = 0x76;
/// I2C read reply
pub const I2C_REPLY: u8 = 0x77;
/// Configure the I2C bus
pub const I2C_CONFIG: u8 = 0x78;
/// Query firmware name and version
pub const REPORT_FIRMWARE: u8 = 0x79;
/// Set the analog sampling interval
pub const SAMPLING_INTERVAL: u8 = 0x7A;

/// Terminates one pin's mode list inside a capability response
pub const CAPABILITY_PIN_DELIMITER: u8 = 0x7F;
/// Marks "no analog capability" inside an analog mapping response
pub const NO_ANALOG_CHANNEL: u8 = 0x7F;
