//! YMODEM-CRC sender (module C5).
//!
//! Sender-only implementation of YMODEM with 1024-byte data blocks and a
//! CRC-16 trailer (no checksum fallback, no 'G' mode) — spec §4.5. A
//! fresh [`YmodemSender`] is built per image; it owns no state across
//! files, matching §9's note to treat payload templates as freshly
//! constructed buffers rather than mutated shared state.

use std::collections::VecDeque;
use std::time::Instant;

use thiserror::Error;
use tokio::time::sleep;

use crate::constants::{
    YMODEM_ACK, YMODEM_ACK_TIMEOUT, YMODEM_BLOCK_DEADLINE, YMODEM_C, YMODEM_C_WAIT_DEADLINE,
    YMODEM_EOT, YMODEM_LONG_DATA_LEN, YMODEM_NAK, YMODEM_SHORT_DATA_LEN, YMODEM_SOH, YMODEM_STX,
};
use crate::crc::crc16;
use crate::transport::SerialTransport;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum YmodemError {
    #[error("timed out waiting for the receiver's 'C' start byte")]
    CWaitTimeout,

    #[error("block {0} was not acknowledged within the per-block deadline")]
    BlockTimeout(u8),

    #[error("finish block was never acknowledged")]
    FinishFailed,

    #[error("transport I/O error: {0}")]
    TransportIo(String),
}

/// Outcome of one ACK/NAK wait cycle (spec §4.5 "ACK discipline").
enum AckOutcome {
    Ack,
    Nak,
    Timeout,
}

/// Bytes read from the transport but not yet consumed by the current
/// wait — carried across stages of one `send()` call so that, e.g., an
/// ACK byte delivered alongside the 'C' start byte in the same read
/// isn't dropped on the floor.
struct InputBuffer {
    pending: VecDeque<u8>,
}

impl InputBuffer {
    fn new() -> Self {
        InputBuffer {
            pending: VecDeque::new(),
        }
    }

    async fn fill(&mut self, transport: &mut dyn SerialTransport) -> Result<(), YmodemError> {
        let bytes = transport
            .read_available()
            .await
            .map_err(|e| YmodemError::TransportIo(e.to_string()))?;
        self.pending.extend(bytes);
        Ok(())
    }

    fn take_byte(&mut self) -> Option<u8> {
        self.pending.pop_front()
    }
}

pub struct YmodemSender;

impl Default for YmodemSender {
    fn default() -> Self {
        Self::new()
    }
}

impl YmodemSender {
    pub fn new() -> Self {
        YmodemSender
    }

    /// Sends `data` as a single YMODEM-CRC file named `name`: waits for
    /// 'C', sends block 0, then 1024-byte data blocks, EOT, and the
    /// all-zero finish block.
    pub async fn send(
        &self,
        transport: &mut dyn SerialTransport,
        name: &str,
        data: &[u8],
    ) -> Result<(), YmodemError> {
        let mut input = InputBuffer::new();

        wait_for_c(transport, &mut input).await?;

        let block0 = build_block0(name, data.len());
        send_block_with_retry(transport, &mut input, &block0, 0).await?;

        for (i, chunk) in data.chunks(YMODEM_LONG_DATA_LEN).enumerate() {
            let seq = ((i + 1) % 256) as u8;
            let block = build_data_block(seq, chunk);
            send_block_with_retry(transport, &mut input, &block, seq).await?;
        }

        send_eot(transport, &mut input).await?;

        let finish = build_finish_block();
        send_block_with_retry(transport, &mut input, &finish, 0)
            .await
            .map_err(|_| YmodemError::FinishFailed)?;

        Ok(())
    }
}

/// Waits up to 5 s for the receiver's `'C'` start byte (spec §4.5 step 1).
/// Any bytes read alongside it that aren't the 'C' itself are kept in
/// `input` for the next stage rather than discarded.
async fn wait_for_c(
    transport: &mut dyn SerialTransport,
    input: &mut InputBuffer,
) -> Result<(), YmodemError> {
    let deadline = Instant::now() + YMODEM_C_WAIT_DEADLINE;
    while Instant::now() < deadline {
        if let Some(byte) = input.take_byte() {
            if byte == YMODEM_C {
                return Ok(());
            }
            continue;
        }
        input.fill(transport).await?;
        if input.pending.is_empty() {
            sleep(std::time::Duration::from_millis(1)).await;
        }
    }
    Err(YmodemError::CWaitTimeout)
}

/// Builds YMODEM block 0: file name, a NUL, then the hex size string
/// (`"0xNNN"`), zero-padded to 128 data bytes (spec §4.5 step 2).
///
/// `pub(crate)` so other modules' tests (e.g. the orchestrator's
/// scripted-device test) can build the expected byte-exact transcript
/// from the same code that produces it, rather than duplicating it.
pub(crate) fn build_block0(name: &str, size: usize) -> Vec<u8> {
    let mut data = vec![0u8; YMODEM_SHORT_DATA_LEN];
    let mut cursor = 0;
    for &b in name.as_bytes() {
        if cursor >= YMODEM_SHORT_DATA_LEN {
            break;
        }
        data[cursor] = b;
        cursor += 1;
    }
    if cursor < YMODEM_SHORT_DATA_LEN {
        data[cursor] = 0x00;
        cursor += 1;
    }
    let size_str = format!("0x{size:X}");
    for &b in size_str.as_bytes() {
        if cursor >= YMODEM_SHORT_DATA_LEN {
            break;
        }
        data[cursor] = b;
        cursor += 1;
    }

    frame_short_block(0, &data)
}

/// Builds a 1024-byte data block numbered `seq`, zero-padding the final
/// short chunk (spec §4.5 step 3).
pub(crate) fn build_data_block(seq: u8, chunk: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; YMODEM_LONG_DATA_LEN];
    data[..chunk.len()].copy_from_slice(chunk);
    frame_long_block(seq, &data)
}

/// Builds the all-zero finish block (spec §4.5 step 5).
pub(crate) fn build_finish_block() -> Vec<u8> {
    let data = vec![0u8; YMODEM_SHORT_DATA_LEN];
    frame_short_block(0, &data)
}

fn frame_short_block(seq: u8, data: &[u8]) -> Vec<u8> {
    debug_assert_eq!(data.len(), YMODEM_SHORT_DATA_LEN);
    frame_block(YMODEM_SOH, seq, data)
}

fn frame_long_block(seq: u8, data: &[u8]) -> Vec<u8> {
    debug_assert_eq!(data.len(), YMODEM_LONG_DATA_LEN);
    frame_block(YMODEM_STX, seq, data)
}

fn frame_block(marker: u8, seq: u8, data: &[u8]) -> Vec<u8> {
    let mut block = Vec::with_capacity(3 + data.len() + 2);
    block.push(marker);
    block.push(seq);
    block.push(!seq);
    block.extend_from_slice(data);
    let crc = crc16(data);
    block.push((crc >> 8) as u8);
    block.push((crc & 0xFF) as u8);
    block
}

/// Transmits `block` until ACK is received or the 30 s per-block deadline
/// expires, waiting up to 1.5 s per attempt for ACK/NAK (spec §4.5).
async fn send_block_with_retry(
    transport: &mut dyn SerialTransport,
    input: &mut InputBuffer,
    block: &[u8],
    seq: u8,
) -> Result<(), YmodemError> {
    let deadline = Instant::now() + YMODEM_BLOCK_DEADLINE;
    loop {
        if Instant::now() >= deadline {
            return Err(YmodemError::BlockTimeout(seq));
        }
        transport
            .write(block)
            .await
            .map_err(|e| YmodemError::TransportIo(e.to_string()))?;

        match wait_ack(transport, input).await? {
            AckOutcome::Ack => return Ok(()),
            AckOutcome::Nak | AckOutcome::Timeout => continue,
        }
    }
}

/// Sends EOT and retries until ACK; no overall deadline (spec §4.5 step 4).
async fn send_eot(
    transport: &mut dyn SerialTransport,
    input: &mut InputBuffer,
) -> Result<(), YmodemError> {
    loop {
        transport
            .write(&[YMODEM_EOT])
            .await
            .map_err(|e| YmodemError::TransportIo(e.to_string()))?;
        if matches!(wait_ack(transport, input).await?, AckOutcome::Ack) {
            return Ok(());
        }
    }
}

/// Reads bytes for up to 1.5 s, returning the first ACK/NAK seen
/// (spec §4.5 "ACK discipline").
async fn wait_ack(
    transport: &mut dyn SerialTransport,
    input: &mut InputBuffer,
) -> Result<AckOutcome, YmodemError> {
    let deadline = Instant::now() + YMODEM_ACK_TIMEOUT;
    while Instant::now() < deadline {
        if let Some(byte) = input.take_byte() {
            if byte == YMODEM_ACK {
                return Ok(AckOutcome::Ack);
            }
            if byte == YMODEM_NAK {
                return Ok(AckOutcome::Nak);
            }
            continue;
        }
        input.fill(transport).await?;
        if input.pending.is_empty() {
            sleep(std::time::Duration::from_millis(1)).await;
        }
    }
    Ok(AckOutcome::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[test]
    fn block0_layout_matches_golden_bytes() {
        // spec §8 scenario 5: name="boot", size=2048.
        let block = build_block0("boot", 2048);
        assert_eq!(block.len(), 133);
        assert_eq!(block[0], YMODEM_SOH);
        assert_eq!(block[1], 0x00);
        assert_eq!(block[2], 0xFF);
        assert_eq!(&block[3..14], b"boot\x000x800\x00");
        let crc = crc16(&block[3..131]);
        assert_eq!(block[131], (crc >> 8) as u8);
        assert_eq!(block[132], (crc & 0xFF) as u8);
    }

    #[test]
    fn data_block_invariants_hold() {
        let chunk = vec![0x42u8; 500];
        let block = build_data_block(7, &chunk);
        assert_eq!(block.len(), 1029);
        assert_eq!(block[0], YMODEM_STX);
        assert_eq!(block[1], 7);
        assert_eq!((block[1] as u16 + block[2] as u16) & 0xFF, 0xFF);
        let crc = crc16(&block[3..1027]);
        let stored = ((block[1027] as u16) << 8) | block[1028] as u16;
        assert_eq!(crc, stored);
    }

    #[test]
    fn finish_block_is_idempotent() {
        let a = build_finish_block();
        let b = build_finish_block();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn sends_small_file_end_to_end() {
        let mut transport = MockTransport::new();
        transport.queue_rx_data(&[YMODEM_C]);
        transport.queue_rx_data(&[YMODEM_ACK]); // block 0
        transport.queue_rx_data(&[YMODEM_ACK]); // data block 1
        transport.queue_rx_data(&[YMODEM_ACK]); // EOT
        transport.queue_rx_data(&[YMODEM_ACK]); // finish block

        let sender = YmodemSender::new();
        let data = vec![0xAAu8; 10];
        let result = sender.send(&mut transport, "app", &data).await;
        assert!(result.is_ok());

        let tx = transport.get_tx_data();
        assert_eq!(tx[0], YMODEM_SOH);
    }
}
