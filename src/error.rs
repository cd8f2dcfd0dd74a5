//! Crate-wide error type.
//!
//! Every component keeps its own small error enum (`PackageError`,
//! `FrameError`, `YmodemError`) for precise `match`ing in tests; each
//! converts into [`FlashError`] so callers above the component boundary
//! can use `?` without naming the component's error type.

use std::io;

use thiserror::Error;

use crate::frame::FrameError;
use crate::package::PackageError;
use crate::ymodem::YmodemError;

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("package error: {0}")]
    Package(#[from] PackageError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("ymodem error: {0}")]
    Ymodem(#[from] YmodemError),

    #[error("no loader image present in package")]
    NoLoader,

    #[error("handshake did not complete within the deadline")]
    HandshakeTimeout,

    #[error("transport I/O error: {0}")]
    TransportIo(#[from] io::Error),

    #[error("serial port error: {0}")]
    SerialPort(#[from] tokio_serial::Error),
}

pub type Result<T> = std::result::Result<T, FlashError>;
