//! Flash orchestrator (module C6).
//!
//! Sequences phases: open transport → handshake → YMODEM-send the
//! loader → for each app image, DOWNLOAD frame + reply + YMODEM-send →
//! RESET. Grounded on the `flash_fwpkg`/`download_binary` control flow
//! of a WS63-class flasher in the reference corpus, re-expressed over
//! the [`SerialTransport`] trait and the typed §7 error taxonomy instead
//! of broad exception handling.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    CMD_DOWNLOAD, CMD_RESET, ERASE_BLOCK_SIZE, HANDSHAKE_BAUD, INTER_IMAGE_DELAY,
};
use crate::error::{FlashError, Result};
use crate::frame::{self, FrameReceiver};
use crate::handshake;
use crate::logging::{log_debug, log_info, log_warn};
use crate::package::{BinInfo, Package};
use crate::transport::{SerialTransport, TokioSerialTransport};
use crate::ymodem::YmodemSender;

/// Per-run settings surfaced by the CLI, plus the protocol-level
/// deadlines spec §4/§5 names as tunable fields so tests can shrink them
/// instead of waiting on real wall-clock timeouts — mirrors the
/// teacher's pattern of grouping tunables into a small `Default`-deriving
/// config struct rather than threading bare arguments.
#[derive(Debug, Clone)]
pub struct FlashConfig {
    pub firmware_path: PathBuf,
    pub port: String,
    pub target_baud: u32,
    /// Print the package summary and exit without flashing (spec §6 `--show`).
    pub show: bool,
    /// Enable verbose (debug-level) logging (spec §6 `--verbose`).
    pub verbose: bool,
    pub inter_image_delay: Duration,
}

impl FlashConfig {
    pub fn new(firmware_path: impl Into<PathBuf>, port: impl Into<String>, target_baud: u32) -> Self {
        FlashConfig {
            firmware_path: firmware_path.into(),
            port: port.into(),
            target_baud,
            show: false,
            verbose: false,
            inter_image_delay: INTER_IMAGE_DELAY,
        }
    }
}

/// Injectable trace sink (spec §1: "logging/UI formatting, replaced by
/// an injected trace sink"). The orchestrator reports phase transitions,
/// per-image progress, and non-fatal warnings through this trait instead
/// of calling `println!`/`log` directly, so tests can assert on what was
/// reported without capturing stdout.
pub trait Progress: Send {
    fn phase(&mut self, name: &str);
    fn image_progress(&mut self, image_name: &str, sent: usize, total: usize);
    fn warn(&mut self, message: &str);
}

/// Default [`Progress`] implementation, built on the crate's `log`/
/// `env_logger` stack.
pub struct LoggingProgress;

impl Progress for LoggingProgress {
    fn phase(&mut self, name: &str) {
        log_info(&format!("phase: {name}"));
    }

    fn image_progress(&mut self, image_name: &str, sent: usize, total: usize) {
        log_debug(&format!("{image_name}: {sent}/{total} bytes"));
    }

    fn warn(&mut self, message: &str) {
        log_warn(message);
    }
}

/// No-op [`Progress`] implementation for tests.
#[derive(Default)]
pub struct NullProgress;

impl Progress for NullProgress {
    fn phase(&mut self, _name: &str) {}
    fn image_progress(&mut self, _image_name: &str, _sent: usize, _total: usize) {}
    fn warn(&mut self, _message: &str) {}
}

/// Owns the transport for the duration of one flash and guarantees it is
/// closed on every exit path. `close()` is the normal, awaited path;
/// `Drop` is a defensive backstop for early returns via `?`, mirroring
/// how the teacher's `MBusDeviceHandle::disconnect` treats drop-to-close
/// as the baseline and the explicit call as a convenience.
pub struct FlashSession<T: SerialTransport> {
    transport: Option<T>,
}

impl<T: SerialTransport> FlashSession<T> {
    pub fn new(transport: T) -> Self {
        FlashSession {
            transport: Some(transport),
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.transport.as_mut().expect("transport already closed")
    }

    pub async fn close(&mut self) {
        if let Some(mut t) = self.transport.take() {
            let _ = t.close().await;
        }
    }
}

impl<T: SerialTransport> Drop for FlashSession<T> {
    fn drop(&mut self) {
        if self.transport.is_some() {
            // Best effort: an async close can't run from `Drop`. The
            // transport's own `Drop` (closing the underlying port) is
            // the real backstop here; this just documents the intent.
            log_debug("FlashSession dropped without an explicit close()");
        }
    }
}

/// Computes the erase extent for a DOWNLOAD command: `length` rounded up
/// to the next 8 KiB boundary (spec §4.6, integer-exact form per §9).
pub fn erase_size(length: u32) -> u32 {
    ((length + (ERASE_BLOCK_SIZE - 1)) / ERASE_BLOCK_SIZE) * ERASE_BLOCK_SIZE
}

/// Builds the 14-byte DOWNLOAD payload for one application image
/// (spec §4.6 step 6b): `burn_addr_le(4) || length_le(4) || erase_size_le(4) || 0x00 || 0xFF`.
fn download_payload(entry: &BinInfo) -> [u8; 14] {
    let mut payload = [0u8; 14];
    payload[0..4].copy_from_slice(&entry.burn_addr.to_le_bytes());
    payload[4..8].copy_from_slice(&entry.length.to_le_bytes());
    payload[8..12].copy_from_slice(&erase_size(entry.length).to_le_bytes());
    payload[12] = 0x00;
    payload[13] = 0xFF;
    payload
}

/// Runs the full flash sequence against an already-open transport,
/// reading image bytes from `firmware_path`. Used by [`flash`] (which
/// opens a real `TokioSerialTransport`) and directly by tests against a
/// `MockTransport`.
pub async fn flash_with_transport(
    transport: &mut dyn SerialTransport,
    firmware_path: &Path,
    package: &Package,
    target_baud: u32,
    inter_image_delay: Duration,
    progress: &mut dyn Progress,
) -> Result<()> {
    let loader = package.loader().ok_or(FlashError::NoLoader)?;

    progress.phase("handshake");
    handshake::run(transport, target_baud)
        .await
        .map_err(|_| FlashError::HandshakeTimeout)?;

    progress.phase("send loader");
    send_image(transport, firmware_path, package, loader, progress).await?;

    // The device may or may not reply after the loader transfer; tolerate
    // timeout here per spec §4.6 step 5 / §9 open question.
    if let Some(Err(e)) = await_one_frame(transport).await? {
        progress.warn(&format!("post-loader frame warning: {e}"));
    }

    // Spec §3: any `type` other than loader (0) is "application-like" for
    // orchestration purposes, not just the ones declaring `type == 1`.
    // `Package::apps()` stays narrow (spec §4.2's literal query); the
    // orchestrator widens it here to cover reserved types too.
    for app in package.entries().iter().filter(|e| !e.is_loader()) {
        progress.phase(&format!("download {}", app.name));
        let download_frame = frame::encode(CMD_DOWNLOAD, &download_payload(app));
        transport.write(&download_frame).await?;

        match await_one_frame(transport).await? {
            Some(Ok(_)) => {}
            Some(Err(e)) => progress.warn(&format!("download reply warning: {e}")),
            None => return Err(FlashError::Frame(crate::frame::FrameError::FrameTimeout)),
        }

        send_image(transport, firmware_path, package, app, progress).await?;
        tokio::time::sleep(inter_image_delay).await;
    }

    progress.phase("reset");
    let reset_frame = frame::encode(CMD_RESET, &[0x00, 0x00]);
    transport.write(&reset_frame).await?;
    let _ = await_one_frame(transport).await?; // ignore reply, per spec §4.6 step 7

    Ok(())
}

/// Polls `transport` until one frame is decoded (`Some(Ok)`), one frame
/// fails validation (`Some(Err)`), or the 5 s receive deadline expires
/// (`None`) — the shared shape behind spec §4.6 steps 5, 6c, and 7.
async fn await_one_frame(
    transport: &mut dyn SerialTransport,
) -> Result<Option<std::result::Result<frame::Frame, crate::frame::FrameError>>> {
    let mut receiver = FrameReceiver::with_default_timeout();
    while !receiver.is_expired() {
        let bytes = transport.read_available().await?;
        if bytes.is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
            continue;
        }
        if let Some(result) = receiver.push_bytes(&bytes) {
            return Ok(Some(result));
        }
    }
    Ok(None)
}

async fn send_image(
    transport: &mut dyn SerialTransport,
    firmware_path: &Path,
    package: &Package,
    entry: &BinInfo,
    progress: &mut dyn Progress,
) -> Result<()> {
    let bytes = package.read_image(firmware_path, entry)?;
    progress.image_progress(&entry.name, 0, bytes.len());
    let sender = YmodemSender::new();
    sender.send(transport, &entry.name, &bytes).await?;
    progress.image_progress(&entry.name, bytes.len(), bytes.len());
    Ok(())
}

/// Top-level entry point used by the CLI: parses the package, opens the
/// real serial transport at 115200 baud, and runs the full sequence.
pub async fn flash(config: &FlashConfig, progress: &mut dyn Progress) -> Result<()> {
    let package = Package::parse(&config.firmware_path)?;

    let transport = TokioSerialTransport::open(&config.port, HANDSHAKE_BAUD).await?;
    let mut session = FlashSession::new(transport);

    let result = flash_with_transport(
        session.transport_mut(),
        &config.firmware_path,
        &package,
        config.target_baud,
        config.inter_image_delay,
        progress,
    )
    .await;

    session.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{FWPKG_MAGIC, HANDSHAKE_ACK_PREFIX};
    use crate::crc::crc16;
    use crate::transport::MockTransport;

    fn build_package_bytes(loader_len: u32, app_len: u32) -> Vec<u8> {
        let header_and_entries_len = 12 + 52 * 2;
        let loader_offset = header_and_entries_len as u32;
        let app_offset = loader_offset + loader_len;

        let mut entry_loader = vec![0u8; 32];
        entry_loader[..6].copy_from_slice(b"loader");
        entry_loader.extend_from_slice(&loader_offset.to_le_bytes());
        entry_loader.extend_from_slice(&loader_len.to_le_bytes());
        entry_loader.extend_from_slice(&0u32.to_le_bytes());
        entry_loader.extend_from_slice(&0u32.to_le_bytes());
        entry_loader.extend_from_slice(&0u32.to_le_bytes());

        let mut entry_app = vec![0u8; 32];
        entry_app[..3].copy_from_slice(b"app");
        entry_app.extend_from_slice(&app_offset.to_le_bytes());
        entry_app.extend_from_slice(&app_len.to_le_bytes());
        entry_app.extend_from_slice(&0x1000_0000u32.to_le_bytes());
        entry_app.extend_from_slice(&app_len.to_le_bytes());
        entry_app.extend_from_slice(&1u32.to_le_bytes());

        let mut body = Vec::new();
        body.extend_from_slice(&2u16.to_le_bytes());
        body.extend_from_slice(&(header_and_entries_len as u32 + loader_len + app_len).to_le_bytes());
        body.extend_from_slice(&entry_loader);
        body.extend_from_slice(&entry_app);
        let crc = crc16(&body);

        let mut out = Vec::new();
        out.extend_from_slice(&FWPKG_MAGIC.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&vec![0x11u8; loader_len as usize]);
        out.extend_from_slice(&vec![0x22u8; app_len as usize]);
        out
    }

    #[test]
    fn erase_size_rounds_up_to_8kib() {
        assert_eq!(erase_size(0), 0);
        assert_eq!(erase_size(1), 8192);
        assert_eq!(erase_size(8192), 8192);
        assert_eq!(erase_size(8193), 16384);
    }

    /// Builds the transcript a correct `YmodemSender::send` writes for
    /// `data` named `name`: block 0, one data block per 1024-byte chunk,
    /// EOT, finish block — built from the same functions the sender uses
    /// so this is a byte-exact oracle, not a reimplementation.
    fn expected_ymodem_tx(name: &str, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&crate::ymodem::build_block0(name, data.len()));
        for (i, chunk) in data.chunks(crate::constants::YMODEM_LONG_DATA_LEN).enumerate() {
            let seq = ((i + 1) % 256) as u8;
            out.extend_from_slice(&crate::ymodem::build_data_block(seq, chunk));
        }
        out.push(crate::constants::YMODEM_EOT);
        out.extend_from_slice(&crate::ymodem::build_finish_block());
        out
    }

    /// Spec §8 scenario 6: a scripted loopback device that issues 'C',
    /// ACKs each block, and returns the expected handshake-ACK prefix.
    /// `MockTransport` delivers each `queue_rx_data` call as one discrete
    /// read event (see `transport.rs`), so the handshake's poll loop
    /// consumes only the queued ACK prefix and leaves every later
    /// phase's bytes queued until that phase actually reads — no
    /// separate baud-gating is needed to keep the phases from bleeding
    /// into each other.
    #[tokio::test]
    async fn full_flash_against_scripted_device() {
        use crate::constants::{YMODEM_ACK, YMODEM_C};
        use std::io::Write;

        let pkg_bytes = build_package_bytes(4, 4);
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&pkg_bytes).unwrap();
        let package = Package::parse_bytes(&pkg_bytes).unwrap();
        let loader = package.loader().unwrap().clone();
        let app = package.entries()[1].clone();
        let loader_bytes = package.read_image(tmp.path(), &loader).unwrap();
        let app_bytes = package.read_image(tmp.path(), &app).unwrap();

        let mut transport = MockTransport::new();
        transport.queue_rx_data(&HANDSHAKE_ACK_PREFIX);
        // Loader YMODEM.
        transport.queue_rx_data(&[YMODEM_C]);
        transport.queue_rx_data(&[YMODEM_ACK]); // block 0
        transport.queue_rx_data(&[YMODEM_ACK]); // data block
        transport.queue_rx_data(&[YMODEM_ACK]); // EOT
        transport.queue_rx_data(&[YMODEM_ACK]); // finish
        // Post-loader frame reply is tolerated either way; supply a
        // harmless one so the test doesn't pay the 5 s timeout.
        transport.queue_frame_response(&frame::encode(0xE1, &[]));
        // DOWNLOAD reply.
        transport.queue_frame_response(&frame::encode(0xE1, &[]));
        // App YMODEM.
        transport.queue_rx_data(&[YMODEM_C]);
        transport.queue_rx_data(&[YMODEM_ACK]);
        transport.queue_rx_data(&[YMODEM_ACK]);
        transport.queue_rx_data(&[YMODEM_ACK]);
        transport.queue_rx_data(&[YMODEM_ACK]);
        // RESET reply.
        transport.queue_frame_response(&frame::encode(0xE1, &[]));

        let mut progress = NullProgress;
        let result = flash_with_transport(
            &mut transport,
            tmp.path(),
            &package,
            921_600,
            Duration::from_millis(1),
            &mut progress,
        )
        .await;

        assert!(result.is_ok(), "flash failed: {result:?}");
        assert_eq!(transport.current_baud(), 921_600);

        let mut expected_tx = Vec::new();
        expected_tx.extend_from_slice(&handshake::encode_handshake(921_600));
        expected_tx.extend_from_slice(&expected_ymodem_tx(&loader.name, &loader_bytes));
        expected_tx.extend_from_slice(&frame::encode(CMD_DOWNLOAD, &download_payload(&app)));
        expected_tx.extend_from_slice(&expected_ymodem_tx(&app.name, &app_bytes));
        expected_tx.extend_from_slice(&frame::encode(CMD_RESET, &[0x00, 0x00]));

        assert_eq!(transport.get_tx_data(), expected_tx);
    }

    #[tokio::test]
    async fn fails_with_no_loader() {
        let mut entry_app = vec![0u8; 32];
        entry_app[..3].copy_from_slice(b"app");
        entry_app.extend_from_slice(&0u32.to_le_bytes());
        entry_app.extend_from_slice(&0u32.to_le_bytes());
        entry_app.extend_from_slice(&0u32.to_le_bytes());
        entry_app.extend_from_slice(&0u32.to_le_bytes());
        entry_app.extend_from_slice(&1u32.to_le_bytes());

        let mut body = Vec::new();
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&entry_app);
        let crc = crc16(&body);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&FWPKG_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&body);

        let package = Package::parse_bytes(&bytes).unwrap();
        let mut transport = MockTransport::new();
        let mut progress = NullProgress;
        let result = flash_with_transport(
            &mut transport,
            Path::new("unused"),
            &package,
            921_600,
            Duration::from_millis(1),
            &mut progress,
        )
        .await;
        assert!(matches!(result, Err(FlashError::NoLoader)));
    }
}
