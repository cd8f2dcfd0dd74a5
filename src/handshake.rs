//! Handshake / baud negotiator (module C4).
//!
//! Repeatedly sends a handshake frame at 115200 baud until the device's
//! ACK prefix shows up in the read buffer, then switches the local baud
//! rate to match the device. Grounded on the connect/retry loop shape of
//! a WS63-class flasher in the reference corpus (`try_connect`/
//! `wait_for_c`-style polling), re-expressed over [`SerialTransport`].

use std::time::Instant;

use tokio::time::sleep;

use crate::constants::{
    CMD_HANDSHAKE, HANDSHAKE_ACK_PREFIX, HANDSHAKE_BAUD, HANDSHAKE_DEADLINE,
    HANDSHAKE_POLL_GAP, HANDSHAKE_SETTLE_DELAY,
};
use crate::frame;
use crate::transport::SerialTransport;

/// Builds the 8-byte handshake payload for `target_baud` (spec §4.4):
/// `baud_le(4) || 0x08 || 0x01 || 0x00 || 0x00`.
pub fn handshake_payload(target_baud: u32) -> [u8; 8] {
    let mut payload = [0u8; 8];
    payload[0..4].copy_from_slice(&target_baud.to_le_bytes());
    payload[4] = 0x08;
    payload[5] = 0x01;
    payload
}

/// Encodes the full handshake frame for `target_baud`.
pub fn encode_handshake(target_baud: u32) -> Vec<u8> {
    frame::encode(CMD_HANDSHAKE, &handshake_payload(target_baud))
}

/// Returns `true` if the expected ACK prefix appears anywhere in `buf`.
pub fn contains_handshake_ack(buf: &[u8]) -> bool {
    buf.windows(HANDSHAKE_ACK_PREFIX.len())
        .any(|w| w == HANDSHAKE_ACK_PREFIX)
}

/// Runs the handshake loop against `transport`: opens at 115200 with RTS
/// de-asserted, sends the handshake frame, polls for the ACK prefix until
/// the 10 s deadline, then switches local baud to `target_baud` and
/// settles for ~500 ms. Returns `Ok(())` on success, `Err(())` on
/// timeout — callers convert this to [`crate::error::FlashError::HandshakeTimeout`].
pub async fn run(
    transport: &mut dyn SerialTransport,
    target_baud: u32,
) -> Result<(), ()> {
    transport.set_baud(HANDSHAKE_BAUD).await.map_err(|_| ())?;
    transport.set_rts(false).await.map_err(|_| ())?;

    let handshake_bytes = encode_handshake(target_baud);
    let deadline = Instant::now() + HANDSHAKE_DEADLINE;
    let mut accumulated = Vec::new();

    while Instant::now() < deadline {
        transport.write(&handshake_bytes).await.map_err(|_| ())?;
        sleep(HANDSHAKE_POLL_GAP).await;

        let bytes = transport.read_available().await.map_err(|_| ())?;
        accumulated.extend_from_slice(&bytes);
        if contains_handshake_ack(&accumulated) {
            transport.set_baud(target_baud).await.map_err(|_| ())?;
            sleep(HANDSHAKE_SETTLE_DELAY).await;
            return Ok(());
        }
        // Bound the scan buffer; only the tail can ever contain a fresh
        // prefix once a negative match has been ruled out.
        let keep_from = accumulated
            .len()
            .saturating_sub(HANDSHAKE_ACK_PREFIX.len() - 1);
        accumulated.drain(..keep_from);
    }

    Err(())
}
