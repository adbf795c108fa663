//! Sysex frame decoding.
//!
//! Sysex frames are `0xF0 <command> <payload...> 0xF7` with a
//! variable-length payload of 7-bit bytes. [`SysexDecoder`] owns the
//! frame machinery shared by every sysex message: the start byte, the
//! command-byte routing, the payload size cap and the resynchronization
//! rule (a high-bit byte other than the terminator mid-payload means the
//! previous frame was truncated, so the frame is abandoned rather than
//! the stray byte absorbed). The per-command payload semantics live in
//! the [`SysexPayload`] implementations it routes to.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::core::{Error, Result, PinMode, MAX_DATA_BYTES};
use super::codec::unpack14;
use super::decoder::{Decoder, Step};
use super::message::InboundMessage;

/// Payload decoder for one sysex command
pub trait SysexPayload: Send {
    /// The sysex command byte this decoder owns
    fn command(&self) -> u8;

    /// Consumes one payload byte (always < 0x80). Returning a message
    /// emits it mid-frame while the frame continues (capability reports
    /// do this once per pin).
    fn payload_byte(&mut self, byte: u8) -> Result<Option<InboundMessage>>;

    /// Called on the frame terminator; produces the completed message
    fn finish(&mut self) -> Result<Option<InboundMessage>>;

    /// Clears any partial frame state
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy)]
enum SysexState {
    Idle,
    AwaitCommand,
    /// Payload bytes route to `payloads[owner]`; an unknown command has
    /// no owner and the frame is skipped to its terminator
    Payload {
        owner: Option<usize>,
    },
}

/// Decoder for the whole sysex frame family
pub struct SysexDecoder {
    payloads: Vec<Box<dyn SysexPayload>>,
    state: SysexState,
    byte_count: usize,
}

impl SysexDecoder {
    /// Creates a sysex decoder routing to the given payload decoders
    pub fn with_payloads(payloads: Vec<Box<dyn SysexPayload>>) -> Self {
        SysexDecoder {
            payloads,
            state: SysexState::Idle,
            byte_count: 0,
        }
    }

    /// Creates a sysex decoder for the full supported command set
    pub fn full() -> Self {
        Self::with_payloads(vec![
            Box::new(CapabilityPayload::default()),
            Box::new(AnalogMappingPayload::default()),
            Box::new(PinStatePayload::default()),
            Box::new(FirmwarePayload::default()),
            Box::new(StringPayload::default()),
            Box::new(I2cPayload::default()),
        ])
    }

    fn fail(&mut self, msg: impl Into<String>) -> Error {
        self.reset();
        Error::decode(msg)
    }
}

impl Decoder for SysexDecoder {
    fn can_handle(&self, byte: u8) -> bool {
        match self.state {
            SysexState::Idle => byte == super::SYSEX_START,
            SysexState::AwaitCommand => byte < 0x80 || byte == super::SYSEX_END,
            // Resynchronization rule: no high-bit byte other than the
            // terminator is valid mid-payload
            SysexState::Payload { .. } => byte < 0x80 || byte == super::SYSEX_END,
        }
    }

    fn handle(&mut self, byte: u8) -> Result<Step> {
        if !self.can_handle(byte) {
            return Err(self.fail(format!("unexpected byte {:#04x} in sysex frame", byte)));
        }

        match self.state {
            SysexState::Idle => {
                self.state = SysexState::AwaitCommand;
                self.byte_count = 0;
                Ok(Step::Continue)
            }

            SysexState::AwaitCommand => {
                if byte == super::SYSEX_END {
                    debug!("discarding empty sysex frame");
                    self.reset();
                    return Ok(Step::Complete(None));
                }
                let owner = self.payloads.iter().position(|p| p.command() == byte);
                if owner.is_none() {
                    warn!(command = byte, "skipping sysex frame with unknown command");
                }
                self.state = SysexState::Payload { owner };
                Ok(Step::Continue)
            }

            SysexState::Payload { owner } => {
                if byte == super::SYSEX_END {
                    let message = match owner {
                        Some(index) => match self.payloads[index].finish() {
                            Ok(message) => message,
                            Err(e) => {
                                self.reset();
                                return Err(e);
                            }
                        },
                        None => None,
                    };
                    self.reset();
                    return Ok(Step::Complete(message));
                }

                self.byte_count += 1;
                if self.byte_count > MAX_DATA_BYTES {
                    return Err(self.fail("maximum sysex frame size exceeded"));
                }

                match owner {
                    Some(index) => match self.payloads[index].payload_byte(byte) {
                        Ok(Some(message)) => Ok(Step::Emit(message)),
                        Ok(None) => Ok(Step::Continue),
                        Err(e) => {
                            self.reset();
                            Err(e)
                        }
                    },
                    None => Ok(Step::Continue),
                }
            }
        }
    }

    fn reset(&mut self) {
        self.state = SysexState::Idle;
        self.byte_count = 0;
        for payload in &mut self.payloads {
            payload.reset();
        }
    }
}

/// Accumulator for the 7-bit character pairs used by firmware and
/// string payloads. A dangling low byte at the end of a frame carries
/// no character and is dropped.
#[derive(Debug, Default)]
struct SevenBitText {
    cached: Option<u8>,
    text: String,
}

impl SevenBitText {
    fn push(&mut self, byte: u8) {
        match self.cached.take() {
            Some(lsb) => {
                let code = unpack14(lsb, byte) as u32;
                self.text.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            None => self.cached = Some(byte),
        }
    }

    fn take(&mut self) -> String {
        self.cached = None;
        std::mem::take(&mut self.text)
    }
}

/// Capability response payload: per pin, `(mode, resolution)` pairs
/// terminated by 0x7F; one Capability message per pin, then
/// CapabilitiesFinished on the frame terminator
#[derive(Default)]
pub struct CapabilityPayload {
    pin: usize,
    mode_byte: Option<u8>,
    modes: BTreeMap<PinMode, u8>,
}

impl SysexPayload for CapabilityPayload {
    fn command(&self) -> u8 {
        super::CAPABILITY_RESPONSE
    }

    fn payload_byte(&mut self, byte: u8) -> Result<Option<InboundMessage>> {
        match self.mode_byte.take() {
            Some(mode_byte) => {
                let mode = PinMode::from_byte(mode_byte)?;
                self.modes.insert(mode, byte);
                Ok(None)
            }
            None if byte == super::CAPABILITY_PIN_DELIMITER => {
                let message = InboundMessage::Capability {
                    pin: self.pin,
                    modes: std::mem::take(&mut self.modes),
                };
                self.pin += 1;
                Ok(Some(message))
            }
            None => {
                self.mode_byte = Some(byte);
                Ok(None)
            }
        }
    }

    fn finish(&mut self) -> Result<Option<InboundMessage>> {
        if self.mode_byte.is_some() || !self.modes.is_empty() {
            return Err(Error::decode("capability frame ended inside a pin's mode list"));
        }
        self.pin = 0;
        Ok(Some(InboundMessage::CapabilitiesFinished))
    }

    fn reset(&mut self) {
        self.pin = 0;
        self.mode_byte = None;
        self.modes.clear();
    }
}

/// Analog mapping payload: one byte per digital pin in pin order; 0x7F
/// means the pin has no analog channel
#[derive(Default)]
pub struct AnalogMappingPayload {
    channels: Vec<Option<u8>>,
}

impl SysexPayload for AnalogMappingPayload {
    fn command(&self) -> u8 {
        super::ANALOG_MAPPING_RESPONSE
    }

    fn payload_byte(&mut self, byte: u8) -> Result<Option<InboundMessage>> {
        self.channels.push(if byte == super::NO_ANALOG_CHANNEL { None } else { Some(byte) });
        Ok(None)
    }

    fn finish(&mut self) -> Result<Option<InboundMessage>> {
        Ok(Some(InboundMessage::AnalogMapping {
            channels: std::mem::take(&mut self.channels),
        }))
    }

    fn reset(&mut self) {
        self.channels.clear();
    }
}

/// Pin state payload: pin, mode, then at least one state byte; state
/// bytes after the first extend the value 7 bits at a time
#[derive(Default)]
pub struct PinStatePayload {
    pin: Option<u8>,
    mode: Option<PinMode>,
    state: i32,
    state_bytes: usize,
}

impl SysexPayload for PinStatePayload {
    fn command(&self) -> u8 {
        super::PIN_STATE_RESPONSE
    }

    fn payload_byte(&mut self, byte: u8) -> Result<Option<InboundMessage>> {
        if self.pin.is_none() {
            self.pin = Some(byte);
        } else if self.mode.is_none() {
            self.mode = Some(PinMode::from_byte(byte)?);
        } else {
            if self.state_bytes >= 4 {
                return Err(Error::decode("pin state wider than 28 bits"));
            }
            self.state |= (byte as i32) << (7 * self.state_bytes);
            self.state_bytes += 1;
        }
        Ok(None)
    }

    fn finish(&mut self) -> Result<Option<InboundMessage>> {
        let pin = self.pin.take().ok_or_else(|| Error::decode("pin state frame carried no pin"))?;
        let mode = self.mode.take().ok_or_else(|| Error::decode("pin state frame carried no mode"))?;
        if self.state_bytes == 0 {
            return Err(Error::decode(format!("no state bytes in pin state frame for pin {}", pin)));
        }
        let state = self.state;
        self.state = 0;
        self.state_bytes = 0;
        Ok(Some(InboundMessage::PinState { pin: pin as usize, mode, state }))
    }

    fn reset(&mut self) {
        self.pin = None;
        self.mode = None;
        self.state = 0;
        self.state_bytes = 0;
    }
}

/// Firmware report payload: major, minor, then the name as 7-bit
/// character pairs
#[derive(Default)]
pub struct FirmwarePayload {
    major: Option<u8>,
    minor: Option<u8>,
    name: SevenBitText,
}

impl SysexPayload for FirmwarePayload {
    fn command(&self) -> u8 {
        super::REPORT_FIRMWARE
    }

    fn payload_byte(&mut self, byte: u8) -> Result<Option<InboundMessage>> {
        if self.major.is_none() {
            self.major = Some(byte);
        } else if self.minor.is_none() {
            self.minor = Some(byte);
        } else {
            self.name.push(byte);
        }
        Ok(None)
    }

    fn finish(&mut self) -> Result<Option<InboundMessage>> {
        let major = self.major.take().ok_or_else(|| Error::decode("firmware frame carried no version"))?;
        let minor = self.minor.take().ok_or_else(|| Error::decode("firmware frame carried no minor version"))?;
        Ok(Some(InboundMessage::FirmwareInfo { major, minor, name: self.name.take() }))
    }

    fn reset(&mut self) {
        self.major = None;
        self.minor = None;
        self.name.take();
    }
}

/// String payload: 7-bit character pairs, no leading version bytes
#[derive(Default)]
pub struct StringPayload {
    text: SevenBitText,
}

impl SysexPayload for StringPayload {
    fn command(&self) -> u8 {
        super::STRING_DATA
    }

    fn payload_byte(&mut self, byte: u8) -> Result<Option<InboundMessage>> {
        self.text.push(byte);
        Ok(None)
    }

    fn finish(&mut self) -> Result<Option<InboundMessage>> {
        Ok(Some(InboundMessage::SysexString { text: self.text.take() }))
    }

    fn reset(&mut self) {
        self.text.take();
    }
}

/// I2C reply payload: address pair, register pair, then data word pairs
#[derive(Default)]
pub struct I2cPayload {
    header: Vec<u8>,
    data_lsb: Option<u8>,
    data: Vec<u16>,
}

impl SysexPayload for I2cPayload {
    fn command(&self) -> u8 {
        super::I2C_REPLY
    }

    fn payload_byte(&mut self, byte: u8) -> Result<Option<InboundMessage>> {
        if self.header.len() < 4 {
            self.header.push(byte);
        } else {
            match self.data_lsb.take() {
                Some(lsb) => self.data.push(unpack14(lsb, byte)),
                None => self.data_lsb = Some(byte),
            }
        }
        Ok(None)
    }

    fn finish(&mut self) -> Result<Option<InboundMessage>> {
        if self.header.len() < 4 {
            return Err(Error::decode("I2C reply shorter than its address and register"));
        }
        if self.data_lsb.is_some() {
            return Err(Error::decode("I2C reply ended inside a data word"));
        }
        let address = unpack14(self.header[0], self.header[1]);
        let register = unpack14(self.header[2], self.header[3]);
        self.header.clear();
        Ok(Some(InboundMessage::I2cReply {
            address,
            register,
            data: std::mem::take(&mut self.data),
        }))
    }

    fn reset(&mut self) {
        self.header.clear();
        self.data_lsb = None;
        self.data.clear();
    }
}
