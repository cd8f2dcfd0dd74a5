//! `ws63-flash` — a serial (UART) firmware flasher for WS63-class
//! microcontrollers.
//!
//! The library is organized the way the protocol itself is layered:
//! a pure CRC-16 codec ([`crc`]), a firmware package container parser
//! ([`package`]), a vendor command/response framing layer ([`frame`]),
//! a baud-rate handshake ([`handshake`]), a YMODEM-CRC sender
//! ([`ymodem`]), a transport abstraction ([`transport`]), and the
//! orchestrator that sequences all of the above ([`flasher`]).

pub mod constants;
pub mod crc;
pub mod error;
pub mod flasher;
pub mod frame;
pub mod handshake;
pub mod logging;
pub mod package;
pub mod transport;
pub mod ymodem;

pub use error::{FlashError, Result};
pub use flasher::{flash, FlashConfig};
pub use package::Package;
