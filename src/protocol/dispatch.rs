//! Routing of raw bytes to frame decoders.
//!
//! The dispatcher knows nothing about any message's shape: it probes the
//! registered decoders in priority order for a fresh frame's first byte,
//! then feeds the owner every byte until the frame completes or errors.
//! Adding a protocol message means registering another decoder, not
//! touching this logic.

use tracing::trace;

use crate::core::Result;
use super::decoder::{
    AnalogDecoder, Decoder, DigitalDecoder, ProtocolVersionDecoder, Step,
};
use super::message::InboundMessage;
use super::sysex::SysexDecoder;

/// Owns the decoder set and the current stream owner
pub struct DecoderDispatch {
    decoders: Vec<Box<dyn Decoder>>,
    current: Option<usize>,
}

impl DecoderDispatch {
    /// Creates a dispatcher over an explicit decoder list; probe order
    /// is registration order
    pub fn with_decoders(decoders: Vec<Box<dyn Decoder>>) -> Self {
        DecoderDispatch { decoders, current: None }
    }

    /// Creates a dispatcher registering the full supported message set
    pub fn full() -> Self {
        Self::with_decoders(vec![
            Box::new(SysexDecoder::full()),
            Box::new(AnalogDecoder::default()),
            Box::new(DigitalDecoder::default()),
            Box::new(ProtocolVersionDecoder::default()),
        ])
    }

    /// Feeds one byte to the owning decoder, probing for a new owner if
    /// the stream is unowned. Bytes matching no decoder are noise
    /// outside any known frame and are discarded.
    ///
    /// Errors reset ownership; the caller logs them and continues with
    /// the next byte.
    pub fn dispatch(&mut self, byte: u8) -> Result<Option<InboundMessage>> {
        let index = match self.current {
            Some(index) => index,
            None => match self.decoders.iter().position(|d| d.can_handle(byte)) {
                Some(index) => index,
                None => {
                    trace!(byte, "discarding byte outside any known frame");
                    return Ok(None);
                }
            },
        };

        match self.decoders[index].handle(byte) {
            Ok(Step::Continue) => {
                self.current = Some(index);
                Ok(None)
            }
            Ok(Step::Emit(message)) => {
                self.current = Some(index);
                Ok(Some(message))
            }
            Ok(Step::Complete(message)) => {
                self.current = None;
                Ok(message)
            }
            Err(e) => {
                self.current = None;
                Err(e)
            }
        }
    }

    /// Resets every decoder and releases stream ownership
    pub fn reset(&mut self) {
        self.current = None;
        for decoder in &mut self.decoders {
            decoder.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PinMode;

    fn collect(dispatch: &mut DecoderDispatch, bytes: &[u8]) -> Vec<InboundMessage> {
        let mut messages = Vec::new();
        for &byte in bytes {
            if let Ok(Some(message)) = dispatch.dispatch(byte) {
                messages.push(message);
            }
        }
        messages
    }

    #[test]
    fn test_routes_mixed_stream() {
        let mut dispatch = DecoderDispatch::full();
        let messages = collect(
            &mut dispatch,
            &[
                0xE3, 0x2C, 0x02, // analog channel 3 = 300
                0xF9, 2, 3, // protocol version 2.3
                0x91, 0x01, 0x00, // digital port 1
                0xF0, 0x6A, 0x00, 0xF7, // analog mapping
            ],
        );

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], InboundMessage::Analog { channel: 3, value: 300 });
        assert_eq!(messages[1], InboundMessage::ProtocolVersion { major: 2, minor: 3 });
        assert!(matches!(messages[2], InboundMessage::Digital { port: 1, .. }));
        assert!(matches!(messages[3], InboundMessage::AnalogMapping { .. }));
    }

    #[test]
    fn test_noise_discarded_between_frames() {
        let mut dispatch = DecoderDispatch::full();
        // 0x2C is a bare data byte; nothing claims it from idle
        assert!(dispatch.dispatch(0x2C).unwrap().is_none());

        let messages = collect(&mut dispatch, &[0xE0, 0x01, 0x00]);
        assert_eq!(messages, vec![InboundMessage::Analog { channel: 0, value: 1 }]);
    }

    #[test]
    fn test_owner_keeps_stream_across_frame() {
        let mut dispatch = DecoderDispatch::full();
        // 0xF9 mid-analog-frame would match the version decoder from
        // idle, but the analog decoder owns the stream and accepts it
        // as a payload byte
        let messages = collect(&mut dispatch, &[0xE0, 0x79, 0x01]);
        assert_eq!(
            messages,
            vec![InboundMessage::Analog { channel: 0, value: 0x79 | (1 << 7) }]
        );
    }

    #[test]
    fn test_error_releases_ownership() {
        let mut dispatch = DecoderDispatch::full();
        dispatch.dispatch(0xF0).unwrap();
        dispatch.dispatch(0x6C).unwrap();
        assert!(dispatch.dispatch(0x90).is_err());

        // Stream is unowned again; a fresh frame decodes
        let messages = collect(&mut dispatch, &[0xF9, 2, 3]);
        assert_eq!(messages, vec![InboundMessage::ProtocolVersion { major: 2, minor: 3 }]);
    }

    #[test]
    fn test_capability_events_keep_ownership() {
        let mut dispatch = DecoderDispatch::full();
        let messages = collect(
            &mut dispatch,
            &[0xF0, 0x6C, 0x00, 1, 0x7F, 0x02, 10, 0x7F, 0xF7],
        );

        assert_eq!(messages.len(), 3);
        assert!(matches!(
            &messages[0],
            InboundMessage::Capability { pin: 0, modes } if modes.get(&PinMode::Input) == Some(&1)
        ));
        assert!(matches!(
            &messages[1],
            InboundMessage::Capability { pin: 1, modes } if modes.get(&PinMode::Analog) == Some(&10)
        ));
        assert_eq!(messages[2], InboundMessage::CapabilitiesFinished);
    }
}
