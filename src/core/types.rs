use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use super::error::{Error, Result};

/// The closed set of pin modes a Firmata board can report or be assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PinMode {
    /// Digital input
    Input,
    /// Digital output
    Output,
    /// Analog input
    Analog,
    /// Pulse-width modulated output
    Pwm,
    /// Servo control output
    Servo,
    /// Shift register interface
    Shift,
    /// I2C bus member
    I2c,
    /// OneWire bus member
    OneWire,
    /// Stepper motor control
    Stepper,
    /// Rotary encoder input
    Encoder,
}

impl PinMode {
    /// Returns the wire byte for this mode
    pub fn to_byte(self) -> u8 {
        match self {
            PinMode::Input => 0,
            PinMode::Output => 1,
            PinMode::Analog => 2,
            PinMode::Pwm => 3,
            PinMode::Servo => 4,
            PinMode::Shift => 5,
            PinMode::I2c => 6,
            PinMode::OneWire => 7,
            PinMode::Stepper => 8,
            PinMode::Encoder => 9,
        }
    }

    /// Parses a wire byte into a pin mode. Values outside the documented
    /// set are a protocol violation and surface as a decode error.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(PinMode::Input),
            1 => Ok(PinMode::Output),
            2 => Ok(PinMode::Analog),
            3 => Ok(PinMode::Pwm),
            4 => Ok(PinMode::Servo),
            5 => Ok(PinMode::Shift),
            6 => Ok(PinMode::I2c),
            7 => Ok(PinMode::OneWire),
            8 => Ok(PinMode::Stepper),
            9 => Ok(PinMode::Encoder),
            other => Err(Error::decode(format!("unknown pin mode byte {:#04x}", other))),
        }
    }
}

/// A single board pin as discovered during the handshake.
///
/// The handshake state machine is the only writer; everything else sees
/// cloned snapshots.
#[derive(Debug, Clone)]
pub struct Pin {
    /// Pin index on the board
    pub index: usize,
    /// Mode the pin is currently in
    pub mode: PinMode,
    /// Supported modes mapped to their resolution in bits
    pub capabilities: BTreeMap<PinMode, u8>,
    /// Current value; meaning depends on the mode
    pub value: i32,
    /// Analog channel index, present only for pins with analog capability
    pub analog_channel: Option<u8>,
}

impl Pin {
    /// Creates a pin from a capability report
    pub fn new(index: usize, capabilities: BTreeMap<PinMode, u8>) -> Self {
        Pin {
            index,
            mode: PinMode::Output,
            capabilities,
            value: 0,
            analog_channel: None,
        }
    }

    /// Returns true if the pin supports the given mode
    pub fn supports(&self, mode: PinMode) -> bool {
        self.capabilities.contains_key(&mode)
    }
}

/// Firmware identification reported by the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firmware {
    /// Major version
    pub major: u8,
    /// Minor version
    pub minor: u8,
    /// Firmware sketch name
    pub name: String,
}

impl std::fmt::Display for Firmware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}.{}", self.name, self.major, self.minor)
    }
}

/// Current state of the link to the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// Discovery sequence in progress; pin I/O not yet permitted
    Handshaking,
    /// Handshake finished, the board is usable
    Ready,
    /// The transport failed; the connection cannot recover
    Lost(String),
}

impl LinkStatus {
    /// Returns true once the handshake has completed
    pub fn is_ready(&self) -> bool {
        matches!(self, LinkStatus::Ready)
    }
}

/// Configuration for a board connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Enable digital/analog reporting for all discovered pins once ready
    pub auto_report: bool,
    /// Sampling interval to request from the board, in milliseconds
    pub sampling_interval_ms: Option<u16>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        BoardConfig {
            auto_report: true,
            sampling_interval_ms: None,
        }
    }
}
