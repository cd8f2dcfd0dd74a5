//! Byte-stream abstraction (module C7).
//!
//! A `SerialTransport` trait keeps the handshake, YMODEM sender, and
//! orchestrator transport-agnostic, the way the teacher crate keeps
//! `MBusDeviceHandle` behind a narrow set of connect/read/write
//! operations. Two implementations: [`TokioSerialTransport`] for real
//! hardware, and [`MockTransport`] (test-only) for scripted-device tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;

use crate::constants::TRANSPORT_IO_TIMEOUT;

/// Operations a flash session needs from the underlying byte stream
/// (spec §4.7). Read/write carry a 1 s default timeout; higher-level
/// deadlines are enforced by the handshake (C4) and YMODEM sender (C5)
/// using wall-clock polling, not by this trait.
#[async_trait]
pub trait SerialTransport: Send {
    async fn set_baud(&mut self, baud: u32) -> io::Result<()>;
    async fn set_rts(&mut self, asserted: bool) -> io::Result<()>;
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Returns whatever bytes are currently buffered, non-blocking in
    /// spirit: it waits up to one short internal timeout rather than
    /// forever, then returns an empty vec if nothing arrived.
    async fn read_available(&mut self) -> io::Result<Vec<u8>>;
    fn bytes_available(&self) -> usize;
    async fn close(&mut self) -> io::Result<()>;
}

/// Production transport backed by `tokio-serial`'s `SerialStream`,
/// mirroring how the teacher's `MBusDeviceHandle` replaces its
/// `SerialStream` wholesale to switch baud rates.
pub struct TokioSerialTransport {
    port: Option<tokio_serial::SerialStream>,
    port_name: String,
    read_buf: VecDeque<u8>,
}

impl TokioSerialTransport {
    pub async fn open(port_name: &str, baud: u32) -> io::Result<Self> {
        let port = tokio_serial::new(port_name, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .timeout(TRANSPORT_IO_TIMEOUT)
            .open_native_async()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        Ok(TokioSerialTransport {
            port: Some(port),
            port_name: port_name.to_string(),
            read_buf: VecDeque::new(),
        })
    }
}

#[async_trait]
impl SerialTransport for TokioSerialTransport {
    async fn set_baud(&mut self, baud: u32) -> io::Result<()> {
        // `tokio-serial`'s SerialStream has no live baud-switch; reopen,
        // the same way the teacher's MBusDeviceHandle::switch_baud_rate does.
        let port = tokio_serial::new(&self.port_name, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .timeout(TRANSPORT_IO_TIMEOUT)
            .open_native_async()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.port = Some(port);
        Ok(())
    }

    async fn set_rts(&mut self, asserted: bool) -> io::Result<()> {
        if let Some(port) = self.port.as_mut() {
            port.write_request_to_send(asserted)?;
        }
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))?;
        port.write_all(bytes).await
    }

    async fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "transport closed"))?;

        let mut chunk = [0u8; 1024];
        match timeout(TRANSPORT_IO_TIMEOUT, port.read(&mut chunk)).await {
            Ok(Ok(0)) => Ok(Vec::new()),
            Ok(Ok(n)) => {
                self.read_buf.extend(&chunk[..n]);
                Ok(self.read_buf.drain(..).collect())
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(Vec::new()),
        }
    }

    fn bytes_available(&self) -> usize {
        self.read_buf.len()
    }

    async fn close(&mut self) -> io::Result<()> {
        // Dropping `SerialStream` closes the port; there is no explicit
        // close API, matching the teacher's MBusDeviceHandle::disconnect note.
        self.port.take();
        Ok(())
    }
}

/// In-memory scripted transport for protocol tests, grounded on the
/// teacher's `mbus::serial_mock::MockSerialPort`: one queue of rx
/// "arrival events" the device sends (drained one event per
/// `read_available`, the way a real serial read only ever returns
/// whatever happened to be buffered at that instant), one flat buffer
/// for bytes the code under test writes (inspected by assertions).
///
/// Each [`queue_rx_data`](Self::queue_rx_data) call is a distinct event:
/// `read_available` pops and returns exactly one queued event per call
/// rather than draining everything queued so far. This is what lets a
/// scripted test hand the handshake ACK, then the YMODEM `'C'`, then
/// each block's ACK, etc. as separate reads — a single flat buffer
/// would hand a slow reader every future phase's bytes on its first
/// poll.
#[derive(Clone)]
pub struct MockTransport {
    pub rx_events: Arc<Mutex<VecDeque<Vec<u8>>>>,
    pub tx_buffer: Arc<Mutex<Vec<u8>>>,
    pub current_baud: Arc<Mutex<u32>>,
    pub rts_asserted: Arc<Mutex<bool>>,
    pub closed: Arc<Mutex<bool>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            rx_events: Arc::new(Mutex::new(VecDeque::new())),
            tx_buffer: Arc::new(Mutex::new(Vec::new())),
            current_baud: Arc::new(Mutex::new(0)),
            rts_asserted: Arc::new(Mutex::new(false)),
            closed: Arc::new(Mutex::new(false)),
        }
    }

    /// Queues one rx "arrival event": the next `read_available` call
    /// that finds the queue non-empty returns exactly these bytes and
    /// nothing queued after them, matching a scripted device that
    /// replies in discrete, phase-gated bursts.
    pub fn queue_rx_data(&self, data: &[u8]) {
        self.rx_events.lock().unwrap().push_back(data.to_vec());
    }

    /// Returns everything written to the transport so far.
    pub fn get_tx_data(&self) -> Vec<u8> {
        self.tx_buffer.lock().unwrap().clone()
    }

    /// Queues the bytes of an already-encoded vendor frame as one RX event.
    pub fn queue_frame_response(&self, frame_bytes: &[u8]) {
        self.queue_rx_data(frame_bytes);
    }

    pub fn current_baud(&self) -> u32 {
        *self.current_baud.lock().unwrap()
    }
}

#[async_trait]
impl SerialTransport for MockTransport {
    async fn set_baud(&mut self, baud: u32) -> io::Result<()> {
        *self.current_baud.lock().unwrap() = baud;
        Ok(())
    }

    async fn set_rts(&mut self, asserted: bool) -> io::Result<()> {
        *self.rts_asserted.lock().unwrap() = asserted;
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.tx_buffer.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    async fn read_available(&mut self) -> io::Result<Vec<u8>> {
        Ok(self.rx_events.lock().unwrap().pop_front().unwrap_or_default())
    }

    fn bytes_available(&self) -> usize {
        self.rx_events.lock().unwrap().iter().map(Vec::len).sum()
    }

    async fn close(&mut self) -> io::Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_round_trips_bytes() {
        let mut t = MockTransport::new();
        t.queue_rx_data(&[1, 2, 3]);
        let read = t.read_available().await.unwrap();
        assert_eq!(read, vec![1, 2, 3]);

        t.write(&[9, 9]).await.unwrap();
        assert_eq!(t.get_tx_data(), vec![9, 9]);
    }

    #[tokio::test]
    async fn mock_transport_tracks_baud_switch() {
        let mut t = MockTransport::new();
        t.set_baud(921_600).await.unwrap();
        assert_eq!(t.current_baud(), 921_600);
    }
}
