//! Handshake state machine.
//!
//! Before a board is usable, the host walks it through a strictly
//! sequential discovery sequence: protocol version, firmware, per-pin
//! capabilities, analog channel mapping, per-pin state, and finally
//! report activation. Each stage is entered only after the previous
//! stage's terminal message is observed; a trigger arriving in the wrong
//! stage is logged and ignored, never advances the sequence out of
//! order. There is no built-in timeout: a caller wanting bounded startup
//! imposes a deadline externally and calls [`Handshake::reinit`].
//!
//! The pin table lives here and is written nowhere else; other threads
//! see cloned snapshots.

use std::collections::BTreeMap;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::core::{
    BoardConfig, Firmware, LinkStatus, Pin, Result,
    MAX_ANALOG_PINS, MAX_DIGITAL_PORTS,
};
use super::encoder::MessageSender;
use super::message::{InboundMessage, OutboundMessage};

/// Stages of the discovery sequence, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// Waiting for the board's protocol version
    QueryProtocolVersion,
    /// Waiting for the firmware report
    QueryFirmware,
    /// Collecting per-pin capability reports
    QueryCapabilities,
    /// Waiting for the analog channel mapping
    QueryAnalogMappings,
    /// Collecting per-pin state reports
    QueryPinStates,
    /// Activating reports; advances without confirmation
    StartReports,
    /// Discovery finished, the link is usable
    Ready,
}

/// Drives the discovery sequence and owns the discovered pin model
pub struct Handshake {
    stage: HandshakeStage,
    pins: Vec<Pin>,
    /// Analog channel -> pin index, kept separate from the pin table to
    /// avoid aliased mutation
    analog_index: BTreeMap<u8, usize>,
    protocol_version: Option<(u8, u8)>,
    firmware: Option<Firmware>,
    message_tx: MessageSender,
    status_tx: watch::Sender<LinkStatus>,
    config: BoardConfig,
}

impl Handshake {
    /// Creates a handshake that sends through the given queue and
    /// reports link status on the given watch channel. Discovery does
    /// not start until [`Handshake::reinit`] is called.
    pub fn new(
        message_tx: MessageSender,
        status_tx: watch::Sender<LinkStatus>,
        config: BoardConfig,
    ) -> Self {
        Handshake {
            stage: HandshakeStage::QueryProtocolVersion,
            pins: Vec::new(),
            analog_index: BTreeMap::new(),
            protocol_version: None,
            firmware: None,
            message_tx,
            status_tx,
            config,
        }
    }

    /// Current stage
    pub fn stage(&self) -> HandshakeStage {
        self.stage
    }

    /// True once discovery has finished
    pub fn is_ready(&self) -> bool {
        self.stage == HandshakeStage::Ready
    }

    /// The discovered pin table
    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// The analog-capable subset of the pin table, in channel order
    pub fn analog_pins(&self) -> Vec<&Pin> {
        self.analog_index.values().map(|&index| &self.pins[index]).collect()
    }

    /// Protocol version reported by the board, if seen
    pub fn protocol_version(&self) -> Option<(u8, u8)> {
        self.protocol_version
    }

    /// Firmware reported by the board, if seen
    pub fn firmware(&self) -> Option<&Firmware> {
        self.firmware.as_ref()
    }

    /// Marks the link as irrecoverably gone. Called by the transport
    /// tasks when the underlying channel fails.
    pub fn mark_lost(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "link lost");
        self.status_tx.send_replace(LinkStatus::Lost(reason));
    }

    /// (Re-)starts discovery from the beginning, clearing the pin
    /// table. Used both for the initial handshake and to recover from a
    /// suspected desynchronized board.
    pub fn reinit(&mut self) -> Result<()> {
        debug!("starting board discovery");
        self.pins.clear();
        self.analog_index.clear();
        self.protocol_version = None;
        self.firmware = None;
        self.status_tx.send_replace(LinkStatus::Handshaking);
        self.enter(HandshakeStage::QueryProtocolVersion)
    }

    /// Performs a stage's sends and records it as current
    fn enter(&mut self, stage: HandshakeStage) -> Result<()> {
        self.stage = stage;
        match stage {
            HandshakeStage::QueryProtocolVersion => {
                // The board may still be streaming reports from a
                // previous session; silence it before querying.
                self.stop_reports()?;
                self.message_tx.send(&OutboundMessage::ProtocolVersionQuery)
            }

            HandshakeStage::QueryFirmware => {
                self.message_tx.send(&OutboundMessage::QueryFirmware)
            }

            HandshakeStage::QueryCapabilities => {
                self.pins.clear();
                self.analog_index.clear();
                self.message_tx.send(&OutboundMessage::QueryCapability)
            }

            HandshakeStage::QueryAnalogMappings => {
                self.message_tx.send(&OutboundMessage::AnalogMappingQuery)
            }

            HandshakeStage::QueryPinStates => {
                if self.pins.is_empty() {
                    // Nothing to query and no reply to wait for
                    return self.enter(HandshakeStage::StartReports);
                }
                for index in 0..self.pins.len() {
                    self.message_tx.send(&OutboundMessage::PinStateQuery { pin: index as u8 })?;
                }
                Ok(())
            }

            HandshakeStage::StartReports => {
                if self.config.auto_report {
                    let ports = self.pins.len().div_ceil(8);
                    for port in 0..ports {
                        self.message_tx.send(&OutboundMessage::ToggleDigitalReport {
                            port: port as u8,
                            enabled: true,
                        })?;
                    }
                    for &channel in self.analog_index.keys() {
                        self.message_tx.send(&OutboundMessage::ToggleAnalogReport {
                            channel,
                            enabled: true,
                        })?;
                    }
                }
                if let Some(ms) = self.config.sampling_interval_ms {
                    self.message_tx.send(&OutboundMessage::SamplingInterval { ms })?;
                }
                // No confirmation exists for report toggles
                self.enter(HandshakeStage::Ready)
            }

            HandshakeStage::Ready => {
                debug!(pins = self.pins.len(), "board discovery finished");
                self.status_tx.send_replace(LinkStatus::Ready);
                Ok(())
            }
        }
    }

    /// Disables reporting for every protocol-addressable port and
    /// analog channel. The pin table may be stale or empty at this
    /// point, so the full protocol range is toggled.
    fn stop_reports(&mut self) -> Result<()> {
        for port in 0..MAX_DIGITAL_PORTS as u8 {
            self.message_tx.send(&OutboundMessage::ToggleDigitalReport { port, enabled: false })?;
        }
        for channel in 0..MAX_ANALOG_PINS as u8 {
            self.message_tx.send(&OutboundMessage::ToggleAnalogReport { channel, enabled: false })?;
        }
        Ok(())
    }

    /// Consumes one decoded message, updating the pin model and
    /// advancing the discovery sequence where the message is the
    /// current stage's terminal event
    pub fn handle_message(&mut self, message: &InboundMessage) -> Result<()> {
        match message {
            InboundMessage::ProtocolVersion { major, minor } => {
                self.protocol_version = Some((*major, *minor));
                if self.stage == HandshakeStage::QueryProtocolVersion {
                    return self.enter(HandshakeStage::QueryFirmware);
                }
                debug!(stage = ?self.stage, "ignoring protocol version outside its stage");
            }

            InboundMessage::FirmwareInfo { major, minor, name } => {
                self.firmware = Some(Firmware { major: *major, minor: *minor, name: name.clone() });
                if self.stage == HandshakeStage::QueryFirmware {
                    return self.enter(HandshakeStage::QueryCapabilities);
                }
                debug!(stage = ?self.stage, "ignoring firmware report outside its stage");
            }

            InboundMessage::Capability { pin, modes } => {
                if self.stage != HandshakeStage::QueryCapabilities {
                    debug!(stage = ?self.stage, "ignoring capability report outside its stage");
                    return Ok(());
                }
                let index = self.pins.len();
                if *pin != index {
                    warn!(reported = pin, expected = index, "capability report out of order");
                }
                self.pins.push(Pin::new(index, modes.clone()));
            }

            InboundMessage::CapabilitiesFinished => {
                if self.stage == HandshakeStage::QueryCapabilities {
                    return self.enter(HandshakeStage::QueryAnalogMappings);
                }
            }

            InboundMessage::AnalogMapping { channels } => {
                if self.stage != HandshakeStage::QueryAnalogMappings {
                    debug!(stage = ?self.stage, "ignoring analog mapping outside its stage");
                    return Ok(());
                }
                if channels.len() > self.pins.len() {
                    warn!(
                        mapped = channels.len(),
                        known = self.pins.len(),
                        "analog mapping longer than the pin table, ignoring the excess"
                    );
                }
                for (index, channel) in channels.iter().enumerate().take(self.pins.len()) {
                    if let Some(channel) = channel {
                        self.pins[index].analog_channel = Some(*channel);
                        self.analog_index.insert(*channel, index);
                    }
                }
                return self.enter(HandshakeStage::QueryPinStates);
            }

            InboundMessage::PinState { pin, mode, state } => {
                let Some(entry) = self.pins.get_mut(*pin) else {
                    warn!(pin, "pin state report for an unknown pin");
                    return Ok(());
                };
                entry.mode = *mode;
                entry.value = *state;

                // The last pin's response is the stage's terminal event
                if self.stage == HandshakeStage::QueryPinStates && *pin == self.pins.len() - 1 {
                    return self.enter(HandshakeStage::StartReports);
                }
            }

            InboundMessage::Analog { channel, value } => {
                if !self.is_ready() {
                    return Ok(());
                }
                match self.analog_index.get(channel) {
                    Some(&index) => self.pins[index].value = *value as i32,
                    None => warn!(channel, "analog report for an unmapped channel"),
                }
            }

            InboundMessage::Digital { port, pins } => {
                if !self.is_ready() {
                    return Ok(());
                }
                let base = *port as usize * 8;
                for (offset, high) in pins.iter().enumerate() {
                    if let Some(entry) = self.pins.get_mut(base + offset) {
                        entry.value = *high as i32;
                    }
                }
            }

            // Application-facing messages; the broker forwards them
            InboundMessage::SysexString { .. } | InboundMessage::I2cReply { .. } => {}
        }
        Ok(())
    }
}
