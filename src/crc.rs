//! CRC-16 codec (module C1).
//!
//! Pinned to the CRC-16/XMODEM variant (poly `0x1021`, init `0x0000`, no
//! reflection, no final xor) — see `SPEC_FULL.md` for why this variant was
//! chosen over the vendor's undocumented one. Every call site in this crate
//! (package header, vendor frame trailer, YMODEM block) goes through
//! [`crc16`], so a future correction only changes this file.

use crc::{Crc, CRC_16_XMODEM};

static XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Computes the CRC-16/XMODEM checksum of `data`. Total over all inputs,
/// including the empty slice (`crc16(&[]) == 0`).
pub fn crc16(data: &[u8]) -> u16 {
    XMODEM.checksum(data)
}
