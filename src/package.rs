//! Firmware package parser (module C2 — "Fwpkg").
//!
//! Decodes and validates the `.fwpkg` container described in spec §6:
//! a 12-byte header followed by `count` 52-byte entry records, each
//! pointing at a contiguous image payload later in the same file.

use std::fmt;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use nom::bytes::complete::take;
use nom::number::complete::{le_u16, le_u32};
use nom::IResult;
use thiserror::Error;

use crate::constants::{
    FWPKG_ENTRY_SIZE, FWPKG_HEADER_SIZE, FWPKG_MAGIC, FWPKG_MAX_ENTRIES, FWPKG_NAME_SIZE,
    FWPKG_TYPE_APP, FWPKG_TYPE_LOADER,
};
use crate::crc::crc16;

/// Fixed 12-byte header layout (spec §3/§6): `magic, crc, count, length`,
/// all little-endian. Parsed with `nom` the way the teacher's `frame.rs`
/// decodes its fixed-width M-Bus header fields.
fn parse_header(input: &[u8]) -> IResult<&[u8], (u32, u16, u16, u32)> {
    let (input, magic) = le_u32(input)?;
    let (input, crc) = le_u16(input)?;
    let (input, count) = le_u16(input)?;
    let (input, length) = le_u32(input)?;
    Ok((input, (magic, crc, count, length)))
}

/// One 52-byte entry record: a 32-byte name field followed by five
/// little-endian `u32`s.
fn parse_entry(input: &[u8]) -> IResult<&[u8], (&[u8], u32, u32, u32, u32, u32)> {
    let (input, name) = take(FWPKG_NAME_SIZE)(input)?;
    let (input, offset) = le_u32(input)?;
    let (input, length) = le_u32(input)?;
    let (input, burn_addr) = le_u32(input)?;
    let (input, burn_size) = le_u32(input)?;
    let (input, r#type) = le_u32(input)?;
    Ok((input, (name, offset, length, burn_addr, burn_size, r#type)))
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PackageError {
    #[error("file is too short to contain a package header")]
    HeaderTruncated,

    #[error("bad magic number in package header")]
    BadMagic,

    #[error("package declares more than {FWPKG_MAX_ENTRIES} entries")]
    TooManyEntries,

    #[error("entry {0} extends past end of file")]
    EntryTruncated(usize),

    #[error("entry name is not valid UTF-8")]
    NameEncoding,

    #[error("package header CRC does not match stored value")]
    CrcMismatch,
}

/// One embedded image descriptor (spec §3 `BinInfo`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinInfo {
    pub name: String,
    pub offset: u32,
    pub length: u32,
    pub burn_addr: u32,
    pub burn_size: u32,
    pub r#type: u32,
}

impl BinInfo {
    pub fn is_loader(&self) -> bool {
        self.r#type == FWPKG_TYPE_LOADER
    }

    pub fn is_app(&self) -> bool {
        self.r#type == FWPKG_TYPE_APP
    }
}

/// Parsed representation of a `.fwpkg` container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub magic: u32,
    pub crc: u16,
    pub count: u16,
    pub length: u32,
    pub entries: Vec<BinInfo>,
}

impl Package {
    /// Parses a package container from `path`. See spec §4.2 for the
    /// step-by-step algorithm this follows exactly.
    pub fn parse(path: &Path) -> Result<Self, PackageError> {
        let bytes = fs::read(path).map_err(|_| PackageError::HeaderTruncated)?;
        Self::parse_bytes(&bytes)
    }

    /// Parses a package container already held in memory. Split out from
    /// [`Package::parse`] so tests can exercise the format logic without
    /// touching the filesystem.
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, PackageError> {
        if bytes.len() < FWPKG_HEADER_SIZE {
            return Err(PackageError::HeaderTruncated);
        }

        let (_, (magic, crc, count, length)) =
            parse_header(bytes).map_err(|_| PackageError::HeaderTruncated)?;

        if magic != FWPKG_MAGIC {
            return Err(PackageError::BadMagic);
        }
        if count > FWPKG_MAX_ENTRIES {
            return Err(PackageError::TooManyEntries);
        }

        let entries_region_end = FWPKG_HEADER_SIZE + FWPKG_ENTRY_SIZE * count as usize;
        if bytes.len() < entries_region_end {
            // Identify the first entry that doesn't fit so the error is specific.
            let fit_entries =
                (bytes.len().saturating_sub(FWPKG_HEADER_SIZE)) / FWPKG_ENTRY_SIZE;
            return Err(PackageError::EntryTruncated(fit_entries));
        }

        let mut entries = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let base = FWPKG_HEADER_SIZE + i * FWPKG_ENTRY_SIZE;
            let entry_slice = &bytes[base..base + FWPKG_ENTRY_SIZE];
            let (_, (name_bytes, offset, img_length, burn_addr, burn_size, r#type)) =
                parse_entry(entry_slice).map_err(|_| PackageError::EntryTruncated(i))?;
            let name = decode_name(name_bytes)?;

            entries.push(BinInfo {
                name,
                offset,
                length: img_length,
                burn_addr,
                burn_size,
                r#type,
            });
        }

        let computed = crc16(&bytes[6..entries_region_end]);
        if computed != crc {
            return Err(PackageError::CrcMismatch);
        }

        Ok(Package {
            magic,
            crc,
            count,
            length,
            entries,
        })
    }

    pub fn entries(&self) -> &[BinInfo] {
        &self.entries
    }

    /// First entry with `type == 0`, per spec §4.2.
    pub fn loader(&self) -> Option<&BinInfo> {
        self.entries.iter().find(|e| e.is_loader())
    }

    /// All entries with `type == 1`, in declaration order.
    pub fn apps(&self) -> Vec<&BinInfo> {
        self.entries.iter().filter(|e| e.is_app()).collect()
    }

    /// Entries whose `type` is neither loader (0) nor app (1); carried
    /// through unchanged per spec §3 so `--show` can display everything.
    pub fn others(&self) -> Vec<&BinInfo> {
        self.entries
            .iter()
            .filter(|e| !e.is_loader() && !e.is_app())
            .collect()
    }

    /// Reads `entry.length` bytes from `path` at `entry.offset`. The one
    /// blessed way both the orchestrator and `--show` read image bytes.
    pub fn read_image(&self, path: &Path, entry: &BinInfo) -> io::Result<Vec<u8>> {
        let mut file = fs::File::open(path)?;
        file.seek(SeekFrom::Start(entry.offset as u64))?;
        let mut buf = vec![0u8; entry.length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "fwpkg: magic=0x{:08X} count={} crc=0x{:04X} length={}",
            self.magic, self.count, self.crc, self.length
        )?;
        for (i, e) in self.entries.iter().enumerate() {
            writeln!(
                f,
                "  [{i}] {:<31} type={} offset=0x{:08X} length={} burn_addr=0x{:08X} burn_size={}",
                e.name, e.r#type, e.offset, e.length, e.burn_addr, e.burn_size
            )?;
        }
        Ok(())
    }
}

/// Decodes a 32-byte NUL-padded name field per spec §4.2 step 6.
fn decode_name(field: &[u8]) -> Result<String, PackageError> {
    let end = field.iter().position(|&b| b == 0x00).unwrap_or(field.len());
    std::str::from_utf8(&field[..end])
        .map(str::to_owned)
        .map_err(|_| PackageError::NameEncoding)
}
