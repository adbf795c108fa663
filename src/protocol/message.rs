use std::collections::BTreeMap;

use crate::core::PinMode;

/// Read/write behavior requested in an I2C transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cMode {
    /// Write the payload to the slave
    Write,
    /// Read once
    ReadOnce,
    /// Read continuously until told to stop
    ReadContinuously,
    /// Stop a continuous read
    StopReading,
}

impl I2cMode {
    /// Returns the mode bits as they appear in the address MSB byte
    pub fn to_bits(self) -> u8 {
        match self {
            I2cMode::Write => 0x00,
            I2cMode::ReadOnce => 0x08,
            I2cMode::ReadContinuously => 0x10,
            I2cMode::StopReading => 0x18,
        }
    }
}

/// Messages the host sends to the board.
///
/// Outbound messages are immutable values; encoding never mutates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Ask the board which protocol version it speaks
    ProtocolVersionQuery,
    /// Ask the board for its firmware name and version
    QueryFirmware,
    /// Ask the board to enumerate every pin's supported modes
    QueryCapability,
    /// Ask the board which pins have analog input channels
    AnalogMappingQuery,
    /// Ask for the current mode and state of one pin
    PinStateQuery {
        /// Pin index to query
        pin: u8,
    },
    /// Put a pin into the given mode
    PinMode {
        /// Pin index
        pin: u8,
        /// Mode to assign
        mode: PinMode,
    },
    /// Toggle continuous reporting of an analog channel
    ToggleAnalogReport {
        /// Analog channel index
        channel: u8,
        /// Whether reports should be sent
        enabled: bool,
    },
    /// Toggle continuous reporting of a digital port
    ToggleDigitalReport {
        /// Port index
        port: u8,
        /// Whether reports should be sent
        enabled: bool,
    },
    /// Set the interval between analog samples
    SamplingInterval {
        /// Interval in milliseconds
        ms: u16,
    },
    /// Configure a servo attached to a pin
    ServoConfig {
        /// Pin index
        pin: u8,
        /// Minimum pulse width in microseconds
        min_pulse: u16,
        /// Maximum pulse width in microseconds
        max_pulse: u16,
        /// Initial angle
        angle: u16,
    },
    /// Reset the board to its power-up state
    SystemReset,
    /// Write an analog (PWM/servo) value to a nibble-addressable pin
    Analog {
        /// Pin index, 0..16
        pin: u8,
        /// 14-bit value
        value: u16,
    },
    /// Write an analog value to any pin via the extended sysex form
    ExtendedAnalog {
        /// Pin index
        pin: u8,
        /// 14-bit value
        value: u16,
    },
    /// Write the states of a port's 8 digital pins
    Digital {
        /// Port index
        port: u8,
        /// One state per pin of the port
        pins: [bool; 8],
    },
    /// Configure the board's I2C bus
    I2cConfig {
        /// Whether the board should drive the I2C power pin
        power_pin_on: bool,
        /// Delay between write and read, in microseconds
        delay: u16,
    },
    /// Issue an I2C read or write
    I2cRequest {
        /// Slave address
        address: u16,
        /// Use 10-bit addressing
        ten_bit: bool,
        /// Read/write behavior
        mode: I2cMode,
        /// Register and data words, each sent as a 7-bit pair
        payload: Vec<u16>,
    },
}

/// Messages the board sends to the host, as produced by the decoders.
///
/// Every variant is produced by exactly one decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Protocol version report
    ProtocolVersion {
        /// Major version
        major: u8,
        /// Minor version
        minor: u8,
    },
    /// Firmware name and version report
    FirmwareInfo {
        /// Major version
        major: u8,
        /// Minor version
        minor: u8,
        /// Firmware sketch name
        name: String,
    },
    /// Supported modes for one pin; one such message arrives per pin
    Capability {
        /// Pin index, in arrival order
        pin: usize,
        /// Supported modes mapped to resolution in bits
        modes: BTreeMap<PinMode, u8>,
    },
    /// Marks the end of the capability report
    CapabilitiesFinished,
    /// Analog channel assignment for every digital pin
    AnalogMapping {
        /// One entry per pin: the analog channel, or None
        channels: Vec<Option<u8>>,
    },
    /// Mode and state report for one pin
    PinState {
        /// Pin index
        pin: usize,
        /// Mode the pin is in
        mode: PinMode,
        /// Current state; meaning depends on the mode
        state: i32,
    },
    /// Analog value report for one channel
    Analog {
        /// Analog channel index
        channel: u8,
        /// 14-bit value
        value: u16,
    },
    /// Digital state report for one port
    Digital {
        /// Port index
        port: u8,
        /// One state per pin of the port
        pins: [bool; 8],
    },
    /// Free-form text sent by the board
    SysexString {
        /// Decoded text
        text: String,
    },
    /// Reply to an I2C read
    I2cReply {
        /// Slave address
        address: u16,
        /// Register that was read
        register: u16,
        /// Data words
        data: Vec<u16>,
    },
}

/// Type tag used to key broker subscriptions by message variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ProtocolVersion,
    FirmwareInfo,
    Capability,
    CapabilitiesFinished,
    AnalogMapping,
    PinState,
    Analog,
    Digital,
    SysexString,
    I2cReply,
}

impl InboundMessage {
    /// Returns the type tag for this message
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::ProtocolVersion { .. } => MessageKind::ProtocolVersion,
            InboundMessage::FirmwareInfo { .. } => MessageKind::FirmwareInfo,
            InboundMessage::Capability { .. } => MessageKind::Capability,
            InboundMessage::CapabilitiesFinished => MessageKind::CapabilitiesFinished,
            InboundMessage::AnalogMapping { .. } => MessageKind::AnalogMapping,
            InboundMessage::PinState { .. } => MessageKind::PinState,
            InboundMessage::Analog { .. } => MessageKind::Analog,
            InboundMessage::Digital { .. } => MessageKind::Digital,
            InboundMessage::SysexString { .. } => MessageKind::SysexString,
            InboundMessage::I2cReply { .. } => MessageKind::I2cReply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let msg = InboundMessage::Analog { channel: 0, value: 512 };
        assert_eq!(msg.kind(), MessageKind::Analog);

        let msg = InboundMessage::CapabilitiesFinished;
        assert_eq!(msg.kind(), MessageKind::CapabilitiesFinished);

        let msg = InboundMessage::SysexString { text: "hi".into() };
        assert_eq!(msg.kind(), MessageKind::SysexString);
    }

    #[test]
    fn test_i2c_mode_bits() {
        assert_eq!(I2cMode::Write.to_bits(), 0x00);
        assert_eq!(I2cMode::ReadOnce.to_bits(), 0x08);
        assert_eq!(I2cMode::ReadContinuously.to_bits(), 0x10);
        assert_eq!(I2cMode::StopReading.to_bits(), 0x18);
    }
}
