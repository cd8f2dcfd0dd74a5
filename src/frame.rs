//! Vendor framing layer (module C3).
//!
//! Length-prefixed command/response frames: `magic(4) || total_len(2) ||
//! cmd(1) || ~cmd(1) || payload || crc16(2)`. [`encode`] builds one;
//! [`FrameReceiver`] scans an incoming byte stream for one, byte at a
//! time, per the state machine in spec §4.3.

use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::constants::{FRAME_MAGIC_BYTES, FRAME_MAX_LEN, FRAME_MIN_LEN, FRAME_RECEIVE_DEADLINE};
use crate::crc::crc16;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum FrameError {
    #[error("no complete frame arrived before the receive deadline")]
    FrameTimeout,

    #[error("frame CRC did not match")]
    FrameBadCrc,

    #[error("frame command-inverse byte did not match")]
    FrameBadCmdInv,
}

/// A decoded vendor frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub cmd: u8,
    pub payload: Vec<u8>,
}

/// Encodes `(cmd, payload)` into the on-wire frame bytes (spec §4.3).
/// Built with `BytesMut`/`BufMut`, the way the teacher's `pack_frame`
/// assembles its on-wire buffers.
pub fn encode(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let total_len = payload.len() + FRAME_MIN_LEN;
    let mut out = BytesMut::with_capacity(total_len);
    out.put_slice(&FRAME_MAGIC_BYTES);
    out.put_u16_le(total_len as u16);
    out.put_u8(cmd);
    out.put_u8(cmd ^ 0xFF);
    out.put_slice(payload);
    let crc = crc16(&out);
    out.put_u16_le(crc);
    out.to_vec()
}

/// Decodes a single complete frame (magic through trailing CRC) already
/// held in memory. Used by [`FrameReceiver`] once it has collected
/// `total_len` bytes, and directly by tests.
fn decode_complete(buf: &[u8]) -> Result<Frame, FrameError> {
    debug_assert!(buf.len() >= FRAME_MIN_LEN);
    let cmd = buf[6];
    let cmd_inv = buf[7];
    if cmd_inv != (cmd ^ 0xFF) {
        return Err(FrameError::FrameBadCmdInv);
    }
    let stored_crc = u16::from_le_bytes([buf[buf.len() - 2], buf[buf.len() - 1]]);
    let computed_crc = crc16(&buf[..buf.len() - 2]);
    if computed_crc != stored_crc {
        return Err(FrameError::FrameBadCrc);
    }
    let payload = buf[8..buf.len() - 2].to_vec();
    Ok(Frame { cmd, payload })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Sync(usize),
    Body,
}

/// Byte-at-a-time scanner implementing the Sync/Body state machine from
/// spec §4.3. Feed it bytes as they arrive; it reports a decoded frame
/// once `total_len` bytes have been collected and the trailing checks
/// pass.
pub struct FrameReceiver {
    state: ScanState,
    buf: Vec<u8>,
    total_len: usize,
    deadline: Instant,
    timeout: Duration,
}

impl FrameReceiver {
    pub fn new(timeout: Duration) -> Self {
        FrameReceiver {
            state: ScanState::Sync(0),
            buf: Vec::new(),
            total_len: 0,
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    pub fn with_default_timeout() -> Self {
        Self::new(FRAME_RECEIVE_DEADLINE)
    }

    /// Returns `true` if the overall deadline has passed without a
    /// complete frame. Callers should stop polling and raise
    /// [`FrameError::FrameTimeout`] when this returns `true`.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Feeds one byte into the scanner. Any received byte refreshes the
    /// idle timer, per spec §4.3. Returns `Some(Frame)` once a frame has
    /// been fully collected and validated; validation failures
    /// (`FrameBadCrc`/`FrameBadCmdInv`) reset the scanner to `Sync(0)`
    /// and are surfaced to the caller as `Err` so CRC warnings can be
    /// logged, per the "CRC failure as absent" rule in spec §4.3 — the
    /// caller decides whether that's fatal.
    pub fn push_byte(&mut self, byte: u8) -> Option<Result<Frame, FrameError>> {
        self.deadline = Instant::now() + self.timeout;

        match self.state {
            ScanState::Sync(i) => {
                if byte == FRAME_MAGIC_BYTES[i] {
                    self.buf.push(byte);
                    if i + 1 == FRAME_MAGIC_BYTES.len() {
                        self.state = ScanState::Body;
                    } else {
                        self.state = ScanState::Sync(i + 1);
                    }
                } else if byte == FRAME_MAGIC_BYTES[0] {
                    self.buf.clear();
                    self.buf.push(byte);
                    self.state = ScanState::Sync(1);
                } else {
                    self.buf.clear();
                    self.state = ScanState::Sync(0);
                }
                None
            }
            ScanState::Body => {
                self.buf.push(byte);
                let index = self.buf.len() - 1;
                if index == 5 {
                    let total_len =
                        u16::from_le_bytes([self.buf[4], self.buf[5]]) as usize;
                    self.total_len = total_len;
                    if total_len < FRAME_MIN_LEN || total_len > FRAME_MAX_LEN {
                        // Not a sane frame; resync rather than collecting
                        // an unbounded body.
                        self.buf.clear();
                        self.state = ScanState::Sync(0);
                        return None;
                    }
                }
                if self.total_len != 0 && self.buf.len() == self.total_len {
                    let result = decode_complete(&self.buf);
                    self.buf.clear();
                    self.state = ScanState::Sync(0);
                    self.total_len = 0;
                    Some(result)
                } else {
                    None
                }
            }
        }
    }

    /// Feeds a chunk of bytes, returning the first frame result
    /// encountered (if any) among them.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Option<Result<Frame, FrameError>> {
        for &b in bytes {
            if let Some(result) = self.push_byte(b) {
                return Some(result);
            }
        }
        None
    }
}
