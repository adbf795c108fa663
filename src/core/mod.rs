//! Core types for the Firmata host engine
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{
    BoardConfig,
    Firmware,
    LinkStatus,
    Pin,
    PinMode,
};

/// The maximum number of analog channels addressable in a report toggle
pub const MAX_ANALOG_PINS: usize = 16;

/// The maximum number of digital ports (8 pins => 1 port)
pub const MAX_DIGITAL_PORTS: usize = 16;

/// The maximum number of digital pins
pub const MAX_DIGITAL_PINS: usize = 128;

/// Maximum payload bytes in a sysex frame
pub const MAX_DATA_BYTES: usize = 1024;
