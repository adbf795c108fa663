//! In-memory transport pair.
//!
//! Two endpoints connected back to back: bytes written to one come out
//! of the other. One side plays the host, the other a simulated board;
//! this is the test double for everything above the transport seam.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::core::{Error, Result};
use super::{Transport, TransportReader, TransportWriter, READ_TIMEOUT_MS};

/// One endpoint of an in-memory byte-duplex pair
pub struct LoopbackTransport {
    tx: Sender<Vec<u8>>,
    rx: Option<Receiver<Vec<u8>>>,
}

impl LoopbackTransport {
    /// Creates two connected endpoints
    pub fn pair() -> (LoopbackTransport, LoopbackTransport) {
        let (a_tx, a_rx) = mpsc::channel();
        let (b_tx, b_rx) = mpsc::channel();
        (
            LoopbackTransport { tx: a_tx, rx: Some(b_rx) },
            LoopbackTransport { tx: b_tx, rx: Some(a_rx) },
        )
    }
}

impl Transport for LoopbackTransport {
    fn open(&mut self) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>)> {
        let rx = self
            .rx
            .take()
            .ok_or_else(|| Error::connection_lost("loopback endpoint already opened"))?;

        Ok((
            Box::new(LoopbackReader { rx, pending: VecDeque::new() }),
            Box::new(LoopbackWriter { tx: self.tx.clone() }),
        ))
    }
}

struct LoopbackReader {
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl TransportReader for LoopbackReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(Duration::from_millis(READ_TIMEOUT_MS)) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::connection_lost("loopback peer dropped"));
                }
            }
        }

        let mut count = 0;
        while count < buf.len() {
            match self.pending.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

struct LoopbackWriter {
    tx: Sender<Vec<u8>>,
}

impl TransportWriter for LoopbackWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| Error::connection_lost("loopback peer dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_cross_the_pair() {
        let (mut host, mut board) = LoopbackTransport::pair();
        let (mut host_rx, mut host_tx) = host.open().unwrap();
        let (mut board_rx, mut board_tx) = board.open().unwrap();

        host_tx.write(&[0xF9]).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(board_rx.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0xF9);

        board_tx.write(&[0xF9, 2, 3]).unwrap();
        assert_eq!(host_rx.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[0xF9, 2, 3]);
    }

    #[test]
    fn test_read_times_out_when_idle() {
        let (mut host, _board) = LoopbackTransport::pair();
        let (mut rx, _tx) = host.open().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(rx.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_dropped_peer_is_connection_lost() {
        let (mut host, board) = LoopbackTransport::pair();
        let (mut rx, _tx) = host.open().unwrap();
        drop(board);

        let mut buf = [0u8; 8];
        assert!(matches!(rx.read(&mut buf), Err(Error::ConnectionLost(_))));
    }

    #[test]
    fn test_endpoint_opens_once() {
        let (mut host, _board) = LoopbackTransport::pair();
        host.open().unwrap();
        assert!(host.open().is_err());
    }
}
