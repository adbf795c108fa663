//! Canonical frame encoders for every outbound message.
//!
//! Encoding is a pure function of the message; the same message always
//! produces the same byte sequence. Field validation happens here and
//! surfaces as [`Error::Encode`] before any byte reaches the wire.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::core::{Error, Result, MAX_ANALOG_PINS, MAX_DIGITAL_PINS, MAX_DIGITAL_PORTS};
use super::codec::{pack14, pack_port};
use super::message::OutboundMessage;

/// The largest value a 7-bit pair can carry
const MAX_14BIT: u16 = 0x3FFF;

fn check_pin(pin: u8) -> Result<()> {
    if (pin as usize) < MAX_DIGITAL_PINS {
        Ok(())
    } else {
        Err(Error::encode(format!("pin {} exceeds the {}-pin protocol limit", pin, MAX_DIGITAL_PINS)))
    }
}

fn check_value(value: u16, what: &str) -> Result<()> {
    if value <= MAX_14BIT {
        Ok(())
    } else {
        Err(Error::encode(format!("{} {} exceeds the 14-bit range", what, value)))
    }
}

/// Encodes an outbound message into its canonical byte sequence
pub fn encode(message: &OutboundMessage) -> Result<Bytes> {
    let mut buf = BytesMut::new();

    match message {
        OutboundMessage::ProtocolVersionQuery => {
            buf.put_u8(super::PROTOCOL_VERSION);
        }

        OutboundMessage::QueryFirmware => {
            buf.put_u8(super::SYSEX_START);
            buf.put_u8(super::REPORT_FIRMWARE);
            buf.put_u8(super::SYSEX_END);
        }

        OutboundMessage::QueryCapability => {
            buf.put_u8(super::SYSEX_START);
            buf.put_u8(super::CAPABILITY_QUERY);
            buf.put_u8(super::SYSEX_END);
        }

        OutboundMessage::AnalogMappingQuery => {
            buf.put_u8(super::SYSEX_START);
            buf.put_u8(super::ANALOG_MAPPING_QUERY);
            buf.put_u8(super::SYSEX_END);
        }

        OutboundMessage::PinStateQuery { pin } => {
            check_pin(*pin)?;
            buf.put_u8(super::SYSEX_START);
            buf.put_u8(super::PIN_STATE_QUERY);
            buf.put_u8(*pin);
            buf.put_u8(super::SYSEX_END);
        }

        OutboundMessage::PinMode { pin, mode } => {
            check_pin(*pin)?;
            buf.put_u8(super::SET_PIN_MODE);
            buf.put_u8(*pin);
            buf.put_u8(mode.to_byte());
        }

        OutboundMessage::ToggleAnalogReport { channel, enabled } => {
            if *channel as usize >= MAX_ANALOG_PINS {
                return Err(Error::encode(format!(
                    "analog channel {} exceeds the {}-channel protocol limit",
                    channel, MAX_ANALOG_PINS
                )));
            }
            buf.put_u8(super::REPORT_ANALOG | channel);
            buf.put_u8(*enabled as u8);
        }

        OutboundMessage::ToggleDigitalReport { port, enabled } => {
            if *port as usize >= MAX_DIGITAL_PORTS {
                return Err(Error::encode(format!(
                    "port {} exceeds the {}-port protocol limit",
                    port, MAX_DIGITAL_PORTS
                )));
            }
            buf.put_u8(super::REPORT_DIGITAL | port);
            buf.put_u8(*enabled as u8);
        }

        OutboundMessage::SamplingInterval { ms } => {
            check_value(*ms, "sampling interval")?;
            let (lsb, msb) = pack14(*ms);
            buf.put_u8(super::SYSEX_START);
            buf.put_u8(super::SAMPLING_INTERVAL);
            buf.put_u8(lsb);
            buf.put_u8(msb);
            buf.put_u8(super::SYSEX_END);
        }

        OutboundMessage::ServoConfig { pin, min_pulse, max_pulse, angle } => {
            check_pin(*pin)?;
            check_value(*min_pulse, "servo min pulse")?;
            check_value(*max_pulse, "servo max pulse")?;
            check_value(*angle, "servo angle")?;
            buf.put_u8(super::SYSEX_START);
            buf.put_u8(super::SERVO_CONFIG);
            buf.put_u8(*pin);
            for value in [*min_pulse, *max_pulse, *angle] {
                let (lsb, msb) = pack14(value);
                buf.put_u8(lsb);
                buf.put_u8(msb);
            }
            buf.put_u8(super::SYSEX_END);
        }

        OutboundMessage::SystemReset => {
            buf.put_u8(super::SYSTEM_RESET);
        }

        OutboundMessage::Analog { pin, value } => {
            // The pin travels in the opcode nibble, so only 16 pins are
            // addressable here; ExtendedAnalog covers the rest.
            if *pin > 0x0F {
                return Err(Error::encode(format!(
                    "pin {} cannot be addressed in an analog message, use ExtendedAnalog",
                    pin
                )));
            }
            check_value(*value, "analog value")?;
            let (lsb, msb) = pack14(*value);
            buf.put_u8(super::ANALOG_MESSAGE | pin);
            buf.put_u8(lsb);
            buf.put_u8(msb);
        }

        OutboundMessage::ExtendedAnalog { pin, value } => {
            check_pin(*pin)?;
            check_value(*value, "analog value")?;
            let (lsb, msb) = pack14(*value);
            buf.put_u8(super::SYSEX_START);
            buf.put_u8(super::EXTENDED_ANALOG);
            buf.put_u8(*pin);
            buf.put_u8(lsb);
            buf.put_u8(msb);
            buf.put_u8(super::SYSEX_END);
        }

        OutboundMessage::Digital { port, pins } => {
            if *port as usize >= MAX_DIGITAL_PORTS {
                return Err(Error::encode(format!(
                    "port {} exceeds the {}-port protocol limit",
                    port, MAX_DIGITAL_PORTS
                )));
            }
            let (lsb, msb) = pack14(pack_port(*pins) as u16);
            buf.put_u8(super::DIGITAL_MESSAGE | port);
            buf.put_u8(lsb);
            buf.put_u8(msb);
        }

        OutboundMessage::I2cConfig { power_pin_on, delay } => {
            check_value(*delay, "I2C delay")?;
            let (lsb, msb) = pack14(*delay);
            buf.put_u8(super::SYSEX_START);
            buf.put_u8(super::I2C_CONFIG);
            buf.put_u8(*power_pin_on as u8);
            buf.put_u8(lsb);
            buf.put_u8(msb);
            buf.put_u8(super::SYSEX_END);
        }

        OutboundMessage::I2cRequest { address, ten_bit, mode, payload } => {
            let address_limit = if *ten_bit { 0x400 } else { 0x80 };
            if *address >= address_limit {
                return Err(Error::encode(format!(
                    "I2C address {:#x} out of range for {}-bit addressing",
                    address,
                    if *ten_bit { 10 } else { 7 }
                )));
            }
            let (lsb, msb) = pack14(*address);
            let mut mode_bits = mode.to_bits();
            if *ten_bit {
                mode_bits |= 0x20;
            }
            buf.put_u8(super::SYSEX_START);
            buf.put_u8(super::I2C_REQUEST);
            buf.put_u8(lsb);
            buf.put_u8(msb | mode_bits);
            for word in payload {
                check_value(*word, "I2C data word")?;
                let (lsb, msb) = pack14(*word);
                buf.put_u8(lsb);
                buf.put_u8(msb);
            }
            buf.put_u8(super::SYSEX_END);
        }
    }

    Ok(buf.freeze())
}

/// Handle for queueing encoded frames onto the single wire-writer task.
///
/// Encoding happens at the call site so validation errors surface
/// synchronously; the queue itself only ever carries finished frames.
#[derive(Clone)]
pub struct MessageSender {
    frame_tx: mpsc::UnboundedSender<Bytes>,
}

impl MessageSender {
    /// Creates a sender feeding the given frame queue
    pub fn new(frame_tx: mpsc::UnboundedSender<Bytes>) -> Self {
        MessageSender { frame_tx }
    }

    /// Encodes a message and queues it for transmission
    pub fn send(&self, message: &OutboundMessage) -> Result<()> {
        let frame = encode(message)?;
        self.frame_tx
            .send(frame)
            .map_err(|_| Error::connection_lost("outbound frame queue closed"))
    }
}
