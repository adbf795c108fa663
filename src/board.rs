//! Board connection management.
//!
//! [`Board`] wires a transport to the protocol engine: one blocking
//! task drains incoming bytes and drives dispatch, handshake and broker
//! synchronously per byte; a second task is the single writer on the
//! wire, draining the outbound frame queue. Application threads only
//! ever see snapshots of the pin model and queue validated frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::{BoardConfig, Error, Firmware, LinkStatus, Pin, Result};
use crate::protocol::broker::{MessageBroker, Subscription};
use crate::protocol::dispatch::DecoderDispatch;
use crate::protocol::encoder::MessageSender;
use crate::protocol::message::{InboundMessage, MessageKind, OutboundMessage};
use crate::protocol::state::Handshake;
use crate::transport::Transport;

/// The synchronous protocol engine driven by the ingestion task.
///
/// Dispatch, handshake and broker share one lock, making decoder and
/// pin-table state single-writer by construction.
struct Engine {
    dispatch: DecoderDispatch,
    broker: MessageBroker,
    handshake: Handshake,
}

impl Engine {
    /// Feeds one raw byte through dispatch, then routes any completed
    /// message to the handshake and the broker. Decode errors reset the
    /// offending decoder and are logged; ingestion always continues.
    fn feed(&mut self, byte: u8) {
        match self.dispatch.dispatch(byte) {
            Ok(Some(message)) => {
                if let Err(e) = self.handshake.handle_message(&message) {
                    warn!(error = %e, "handshake failed to process message");
                }
                self.broker.publish(&message);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "recoverable decode error"),
        }
    }
}

/// A connected Firmata board
pub struct Board {
    engine: Arc<Mutex<Engine>>,
    message_tx: MessageSender,
    frame_tx: mpsc::UnboundedSender<Bytes>,
    status_rx: watch::Receiver<LinkStatus>,
    shutdown: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Board {
    /// Opens the transport and starts the discovery handshake. The
    /// returned board is not usable until [`Board::ready`] resolves;
    /// sends before that are rejected with `LinkNotReady`.
    pub async fn connect<T>(mut transport: T, config: BoardConfig) -> Result<Board>
    where
        T: Transport + 'static,
    {
        let (reader, writer) = tokio::task::spawn_blocking(move || transport.open())
            .await
            .map_err(|e| Error::connection_lost(format!("transport open task failed: {}", e)))??;

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::Handshaking);
        let message_tx = MessageSender::new(frame_tx.clone());

        let engine = Arc::new(Mutex::new(Engine {
            dispatch: DecoderDispatch::full(),
            broker: MessageBroker::new(),
            handshake: Handshake::new(message_tx.clone(), status_tx, config),
        }));

        // Queue the discovery sequence before the writer starts so the
        // first bytes on the wire are ours
        engine.lock().unwrap().handshake.reinit()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let reader_task = spawn_reader(reader, engine.clone(), shutdown.clone());
        let writer_task = spawn_writer(writer, frame_rx, engine.clone(), shutdown.clone());

        Ok(Board {
            engine,
            message_tx,
            frame_tx,
            status_rx,
            shutdown,
            reader_task,
            writer_task,
        })
    }

    /// Resolves once the handshake completes, or fails if the link is
    /// lost first. Callers wanting bounded startup wrap this in a
    /// timeout and call [`Board::reinit`] or drop the board on expiry.
    pub async fn ready(&self) -> Result<()> {
        let mut status_rx = self.status_rx.clone();
        loop {
            match &*status_rx.borrow_and_update() {
                LinkStatus::Ready => return Ok(()),
                LinkStatus::Lost(reason) => return Err(Error::connection_lost(reason.clone())),
                LinkStatus::Handshaking => {}
            }
            status_rx
                .changed()
                .await
                .map_err(|_| Error::connection_lost("engine stopped"))?;
        }
    }

    /// True once the handshake has completed
    pub fn is_ready(&self) -> bool {
        self.status_rx.borrow().is_ready()
    }

    /// Current link status
    pub fn status(&self) -> LinkStatus {
        self.status_rx.borrow().clone()
    }

    /// Snapshot of the discovered pin table
    pub fn pins(&self) -> Vec<Pin> {
        self.engine.lock().unwrap().handshake.pins().to_vec()
    }

    /// Snapshot of the analog-capable pins, in channel order
    pub fn analog_pins(&self) -> Vec<Pin> {
        self.engine
            .lock()
            .unwrap()
            .handshake
            .analog_pins()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Protocol version reported by the board, if seen
    pub fn protocol_version(&self) -> Option<(u8, u8)> {
        self.engine.lock().unwrap().handshake.protocol_version()
    }

    /// Firmware reported by the board, if seen
    pub fn firmware(&self) -> Option<Firmware> {
        self.engine.lock().unwrap().handshake.firmware().cloned()
    }

    /// Registers a handler for one inbound message kind
    pub fn subscribe<F>(&self, kind: MessageKind, handler: F) -> Subscription
    where
        F: FnMut(&InboundMessage) + Send + 'static,
    {
        self.engine.lock().unwrap().broker.subscribe(kind, handler)
    }

    /// Removes a subscription
    pub fn unsubscribe(&self, kind: MessageKind, subscription: Subscription) -> bool {
        self.engine.lock().unwrap().broker.unsubscribe(kind, subscription)
    }

    /// Encodes and queues an outbound message. Rejected while the
    /// handshake is incomplete or the link is lost; pin and port
    /// indices are validated against the discovered pin table.
    pub fn send(&self, message: &OutboundMessage) -> Result<()> {
        match &*self.status_rx.borrow() {
            LinkStatus::Lost(reason) => return Err(Error::connection_lost(reason.clone())),
            LinkStatus::Handshaking => {
                return Err(Error::link_not_ready("handshake has not completed"));
            }
            LinkStatus::Ready => {}
        }
        self.validate(message)?;
        self.message_tx.send(message)
    }

    /// Restarts board discovery, clearing the pin table. Used to
    /// recover from a suspected desynchronized board.
    pub fn reinit(&self) -> Result<()> {
        self.engine.lock().unwrap().handshake.reinit()
    }

    /// Shuts down the connection and waits for both transport tasks
    pub async fn close(self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        // An empty frame wakes the writer so it can observe shutdown
        let _ = self.frame_tx.send(Bytes::new());
        let _ = self.writer_task.await;
        let _ = self.reader_task.await;
        Ok(())
    }

    /// Checks a message's pin/port addressing against the discovered
    /// pin table; protocol-range checks live in the encoder
    fn validate(&self, message: &OutboundMessage) -> Result<()> {
        let engine = self.engine.lock().unwrap();
        let handshake = &engine.handshake;
        let pin_count = handshake.pins().len();

        let check_pin = |pin: u8| {
            if (pin as usize) < pin_count {
                Ok(())
            } else {
                Err(Error::encode(format!(
                    "pin {} out of range, the board has {} pins",
                    pin, pin_count
                )))
            }
        };

        match message {
            OutboundMessage::PinStateQuery { pin }
            | OutboundMessage::PinMode { pin, .. }
            | OutboundMessage::ServoConfig { pin, .. }
            | OutboundMessage::Analog { pin, .. }
            | OutboundMessage::ExtendedAnalog { pin, .. } => check_pin(*pin),

            OutboundMessage::Digital { port, .. }
            | OutboundMessage::ToggleDigitalReport { port, .. } => {
                let ports = pin_count.div_ceil(8);
                if (*port as usize) < ports {
                    Ok(())
                } else {
                    Err(Error::encode(format!(
                        "port {} out of range, the board has {} ports",
                        port, ports
                    )))
                }
            }

            OutboundMessage::ToggleAnalogReport { channel, .. } => {
                let mapped = handshake
                    .analog_pins()
                    .iter()
                    .any(|pin| pin.analog_channel == Some(*channel));
                if mapped {
                    Ok(())
                } else {
                    Err(Error::encode(format!("analog channel {} is not mapped on this board", channel)))
                }
            }

            _ => Ok(()),
        }
    }
}

/// Spawns the ingestion task: drains the transport and feeds every
/// byte through the engine in order
fn spawn_reader(
    mut reader: Box<dyn crate::transport::TransportReader>,
    engine: Arc<Mutex<Engine>>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 256];
        loop {
            if shutdown.load(Ordering::SeqCst) {
                debug!("ingestion task shutting down");
                return;
            }
            match reader.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    let mut engine = engine.lock().unwrap();
                    for &byte in &buf[..n] {
                        engine.feed(byte);
                    }
                }
                Err(e) => {
                    engine.lock().unwrap().handshake.mark_lost(e.to_string());
                    return;
                }
            }
        }
    })
}

/// Spawns the single wire-writer task draining the outbound queue
fn spawn_writer(
    mut writer: Box<dyn crate::transport::TransportWriter>,
    mut frame_rx: mpsc::UnboundedReceiver<Bytes>,
    engine: Arc<Mutex<Engine>>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while let Some(frame) = frame_rx.blocking_recv() {
            if shutdown.load(Ordering::SeqCst) {
                debug!("writer task shutting down");
                return;
            }
            if frame.is_empty() {
                continue;
            }
            if let Err(e) = writer.write(&frame) {
                engine.lock().unwrap().handshake.mark_lost(e.to_string());
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use crate::core::PinMode;
    use crate::protocol::codec::pack14;
    use crate::transport::{LoopbackTransport, TransportReader, TransportWriter};

    /// Minimal board-side Firmata responder for one simulated two-pin
    /// board (pin 0 digital, pin 1 analog on channel 0). Replies to the
    /// discovery queries and, on SystemReset, emits one analog report.
    fn spawn_board_sim(mut transport: LoopbackTransport) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let (mut rx, mut tx) = transport.open().unwrap();
            let mut pending: Vec<u8> = Vec::new();
            let mut buf = [0u8; 64];

            loop {
                let n = match rx.read(&mut buf) {
                    Ok(n) => n,
                    Err(_) => return,
                };
                pending.extend_from_slice(&buf[..n]);

                while let Some((consumed, reply)) = parse_host_command(&pending) {
                    pending.drain(..consumed);
                    if let Some(reply) = reply {
                        if tx.write(&reply).is_err() {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Parses one host command from the front of `bytes`, returning how
    /// many bytes it consumed and the simulated reply
    fn parse_host_command(bytes: &[u8]) -> Option<(usize, Option<Vec<u8>>)> {
        let first = *bytes.first()?;
        match first {
            // Protocol version query
            0xF9 => Some((1, Some(vec![0xF9, 2, 3]))),

            // System reset doubles as the test's trigger for a report
            0xFF => {
                let (lsb, msb) = pack14(684);
                Some((1, Some(vec![0xE0, lsb, msb])))
            }

            // Report toggles and pin mode carry fixed payloads
            byte if byte & 0xF0 == 0xC0 || byte & 0xF0 == 0xD0 => {
                if bytes.len() < 2 {
                    return None;
                }
                Some((2, None))
            }
            0xF4 => {
                if bytes.len() < 3 {
                    return None;
                }
                Some((3, None))
            }
            byte if byte & 0xF0 == 0xE0 || byte & 0xF0 == 0x90 => {
                if bytes.len() < 3 {
                    return None;
                }
                Some((3, None))
            }

            // Sysex queries
            0xF0 => {
                let end = bytes.iter().position(|&b| b == 0xF7)?;
                let reply = match bytes[1] {
                    // Firmware query
                    0x79 => {
                        let mut reply = vec![0xF0, 0x79, 2, 3];
                        for ch in "SimFirmata".chars() {
                            reply.push((ch as u8) & 0x7F);
                            reply.push(((ch as u16) >> 7) as u8);
                        }
                        reply.push(0xF7);
                        Some(reply)
                    }
                    // Capability query: pin 0 digital, pin 1 analog
                    0x6B => Some(vec![
                        0xF0, 0x6C, 0, 1, 1, 1, 0x7F, 2, 10, 0x7F, 0xF7,
                    ]),
                    // Analog mapping query: only pin 1 is analog
                    0x69 => Some(vec![0xF0, 0x6A, 0x7F, 0x00, 0xF7]),
                    // Pin state query
                    0x6D => {
                        let pin = bytes[2];
                        let mode = if pin == 1 { 2 } else { 1 };
                        Some(vec![0xF0, 0x6E, pin, mode, 0, 0xF7])
                    }
                    _ => None,
                };
                Some((end + 1, reply))
            }

            _ => Some((1, None)),
        }
    }

    async fn connect_simulated() -> (Board, std::thread::JoinHandle<()>) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let (host_end, board_end) = LoopbackTransport::pair();
        let sim = spawn_board_sim(board_end);
        let board = Board::connect(host_end, BoardConfig::default()).await.unwrap();
        (board, sim)
    }

    #[tokio::test]
    async fn test_discovery_against_simulated_board() {
        let (board, _sim) = connect_simulated().await;

        tokio::time::timeout(Duration::from_secs(5), board.ready())
            .await
            .expect("handshake timed out")
            .unwrap();

        assert!(board.is_ready());
        assert_eq!(board.protocol_version(), Some((2, 3)));
        assert_eq!(board.firmware().unwrap().name, "SimFirmata");

        let pins = board.pins();
        assert_eq!(pins.len(), 2);
        assert!(pins[0].supports(PinMode::Input));
        assert_eq!(pins[1].analog_channel, Some(0));

        let analog = board.analog_pins();
        assert_eq!(analog.len(), 1);
        assert_eq!(analog[0].index, 1);

        board.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_rejected_before_ready() {
        // No simulator: the handshake can never complete
        let (host_end, _board_end) = LoopbackTransport::pair();
        let board = Board::connect(host_end, BoardConfig::default()).await.unwrap();

        let result = board.send(&OutboundMessage::SystemReset);
        assert!(matches!(result, Err(Error::LinkNotReady(_))));
        assert!(!board.is_ready());
        assert!(board.pins().is_empty());

        board.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reports_reach_subscribers() {
        let (board, _sim) = connect_simulated().await;
        tokio::time::timeout(Duration::from_secs(5), board.ready())
            .await
            .expect("handshake timed out")
            .unwrap();

        let (seen_tx, seen_rx) = std_mpsc::channel();
        board.subscribe(MessageKind::Analog, move |message| {
            if let InboundMessage::Analog { channel, value } = message {
                let _ = seen_tx.send((*channel, *value));
            }
        });

        // The simulator answers a reset with one analog report
        board.send(&OutboundMessage::SystemReset).unwrap();

        let (channel, value) = seen_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("no analog report arrived");
        assert_eq!(channel, 0);
        assert_eq!(value, 684);

        // The handshake mirrored the report into the pin table
        assert_eq!(board.pins()[1].value, 684);

        board.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_validates_against_pin_table() {
        let (board, _sim) = connect_simulated().await;
        tokio::time::timeout(Duration::from_secs(5), board.ready())
            .await
            .expect("handshake timed out")
            .unwrap();

        // Two pins: pin 7 does not exist on this board
        assert!(matches!(
            board.send(&OutboundMessage::PinMode { pin: 7, mode: PinMode::Output }),
            Err(Error::Encode(_))
        ));
        assert!(matches!(
            board.send(&OutboundMessage::ToggleAnalogReport { channel: 3, enabled: true }),
            Err(Error::Encode(_))
        ));

        // In-range messages go through
        board.send(&OutboundMessage::PinMode { pin: 0, mode: PinMode::Output }).unwrap();
        board
            .send(&OutboundMessage::Digital { port: 0, pins: [true; 8] })
            .unwrap();

        board.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_lost_link_surfaces_as_connection_lost() {
        let (host_end, board_end) = LoopbackTransport::pair();
        let board = Board::connect(host_end, BoardConfig::default()).await.unwrap();
        drop(board_end);

        // The reader notices the dropped peer shortly
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !matches!(board.status(), LinkStatus::Lost(_)) {
            assert!(std::time::Instant::now() < deadline, "link loss not detected");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(matches!(
            board.send(&OutboundMessage::SystemReset),
            Err(Error::ConnectionLost(_))
        ));
        assert!(matches!(board.ready().await, Err(Error::ConnectionLost(_))));

        board.close().await.unwrap();
    }
}
