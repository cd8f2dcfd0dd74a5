//! Thin wrapper over the `log` crate, initialized by the CLI binary.
//!
//! Kept as a separate module (mirroring the teacher crate) so the rest of
//! the codebase depends on these functions rather than on `env_logger`
//! directly — swapping the backend later only touches this file.

use log::{log_enabled, Level};

/// Installs `env_logger` as the global logger. Safe to call once, at
/// process start; subsequent calls are a silent no-op (`env_logger`
/// itself tolerates double-init via `try_init`).
pub fn init_logger() {
    let _ = env_logger::try_init();
}

pub fn log_debug(msg: &str) {
    if log_enabled!(Level::Debug) {
        log::debug!("{msg}");
    }
}

pub fn log_info(msg: &str) {
    if log_enabled!(Level::Info) {
        log::info!("{msg}");
    }
}

pub fn log_warn(msg: &str) {
    if log_enabled!(Level::Warn) {
        log::warn!("{msg}");
    }
}

pub fn log_error(msg: &str) {
    if log_enabled!(Level::Error) {
        log::error!("{msg}");
    }
}
