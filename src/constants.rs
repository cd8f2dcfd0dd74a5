//! WS63 flashing protocol constants.
//!
//! Magic numbers, command bytes, and defaults for the vendor framing layer,
//! the firmware package container, and the YMODEM-CRC transfer.

use std::time::Duration;

/// Magic value stored at offset 0 of a `.fwpkg` container (little-endian).
pub const FWPKG_MAGIC: u32 = 0xEFBE_ADDF;

/// Maximum number of embedded binaries a package may declare.
pub const FWPKG_MAX_ENTRIES: u16 = 16;

/// Size in bytes of one package entry record (name + 5 little-endian u32 fields).
pub const FWPKG_ENTRY_SIZE: usize = 52;

/// Size in bytes of the fixed package header (magic, crc, count, length).
pub const FWPKG_HEADER_SIZE: usize = 12;

/// Size in bytes of the `name` field within a package entry.
pub const FWPKG_NAME_SIZE: usize = 32;

/// Entry `type` value identifying the first-stage loader image.
pub const FWPKG_TYPE_LOADER: u32 = 0;

/// Entry `type` value identifying an application image.
pub const FWPKG_TYPE_APP: u32 = 1;

/// Vendor frame magic, little-endian on the wire as `EF BE AD DE`.
pub const FRAME_MAGIC: u32 = 0xDEAD_BEEF;
pub const FRAME_MAGIC_BYTES: [u8; 4] = [0xEF, 0xBE, 0xAD, 0xDE];

/// Minimum valid `total_len` for a vendor frame (magic + len + cmd + ~cmd + crc).
pub const FRAME_MIN_LEN: usize = 10;

/// Upper bound on a reply frame the receiver will accept (1024-byte payload + header/CRC).
pub const FRAME_MAX_LEN: usize = 1036;

/// Command byte: handshake / baud-rate negotiation.
pub const CMD_HANDSHAKE: u8 = 0xF0;

/// Command byte: download (flash program) request.
pub const CMD_DOWNLOAD: u8 = 0xD2;

/// Command byte: reset the target after flashing.
pub const CMD_RESET: u8 = 0x87;

/// Expected byte prefix of the device's handshake ACK frame.
pub const HANDSHAKE_ACK_PREFIX: [u8; 8] = [0xEF, 0xBE, 0xAD, 0xDE, 0x0C, 0x00, 0xE1, 0x1E];

/// Baud rate the target boots into and expects the initial handshake at.
pub const HANDSHAKE_BAUD: u32 = 115_200;

/// Recommended baud rates (spec §6); others are accepted with a warning.
pub const RECOMMENDED_BAUD_RATES: &[u32] = &[
    115_200, 230_400, 460_800, 500_000, 576_000, 921_600, 1_000_000, 1_152_000, 1_500_000,
    2_000_000,
];

/// Default target baud rate when the user does not specify one.
pub const DEFAULT_TARGET_BAUD: u32 = 921_600;

/// YMODEM short (SOH) block size: 1 + seq + ~seq + 128 data + 2 CRC.
pub const YMODEM_SHORT_BLOCK_LEN: usize = 133;

/// YMODEM long (STX) block size: 1 + seq + ~seq + 1024 data + 2 CRC.
pub const YMODEM_LONG_BLOCK_LEN: usize = 1029;

pub const YMODEM_SOH: u8 = 0x01;
pub const YMODEM_STX: u8 = 0x02;
pub const YMODEM_EOT: u8 = 0x04;
pub const YMODEM_ACK: u8 = 0x06;
pub const YMODEM_NAK: u8 = 0x15;
pub const YMODEM_C: u8 = b'C';

/// Data-area size of a short (SOH) block.
pub const YMODEM_SHORT_DATA_LEN: usize = 128;

/// Data-area size of a long (STX) block.
pub const YMODEM_LONG_DATA_LEN: usize = 1024;

/// Erase granularity used when computing `erase_size` for a DOWNLOAD command (spec §4.6/§9).
pub const ERASE_BLOCK_SIZE: u32 = 0x2000;

// ---------------------------------------------------------------------------
// Timing (spec §4, §5) — grouped here so tests can see every magic duration
// in one place even though most call sites read them via `FlashConfig`.
// ---------------------------------------------------------------------------

pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);
pub const HANDSHAKE_POLL_GAP: Duration = Duration::from_millis(7);
pub const HANDSHAKE_SETTLE_DELAY: Duration = Duration::from_millis(500);

pub const FRAME_RECEIVE_DEADLINE: Duration = Duration::from_secs(5);

pub const YMODEM_C_WAIT_DEADLINE: Duration = Duration::from_secs(5);
pub const YMODEM_BLOCK_DEADLINE: Duration = Duration::from_secs(30);
pub const YMODEM_ACK_TIMEOUT: Duration = Duration::from_millis(1500);

pub const INTER_IMAGE_DELAY: Duration = Duration::from_millis(100);

pub const TRANSPORT_IO_TIMEOUT: Duration = Duration::from_secs(1);
