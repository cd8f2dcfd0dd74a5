//! CLI entry point (spec §6).
//!
//! Thin binary: parse arguments, initialize logging, either print the
//! package summary (`--show`) or run the full flash sequence, and map
//! any [`ws63_flash::FlashError`] to a non-zero exit code.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ws63_flash::constants::RECOMMENDED_BAUD_RATES;
use ws63_flash::flasher::{flash, FlashConfig, LoggingProgress};
use ws63_flash::logging::{init_logger, log_error, log_warn};
use ws63_flash::Package;

#[derive(Parser, Debug)]
#[command(name = "ws63-flash", about = "Flash firmware onto a WS63-class microcontroller over UART")]
struct Args {
    /// Path to the .fwpkg firmware package.
    firmware_file: PathBuf,

    /// Serial port to flash over (e.g. /dev/ttyUSB0, COM3).
    #[arg(short, long)]
    port: String,

    /// Target baud rate to negotiate after the handshake.
    #[arg(short, long, default_value_t = ws63_flash::constants::DEFAULT_TARGET_BAUD)]
    baudrate: u32,

    /// Print the package summary and exit without flashing.
    #[arg(short, long)]
    show: bool,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = FlashConfig::new(&args.firmware_file, &args.port, args.baudrate);
    config.show = args.show;
    config.verbose = args.verbose;

    if config.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    init_logger();

    if !RECOMMENDED_BAUD_RATES.contains(&config.target_baud) {
        log_warn(&format!(
            "{} is not one of the recommended baud rates; proceeding anyway",
            config.target_baud
        ));
    }

    if config.show {
        return match Package::parse(&config.firmware_path) {
            Ok(package) => {
                println!("{package}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                log_error(&format!("failed to parse package: {e}"));
                ExitCode::FAILURE
            }
        };
    }

    let mut progress = LoggingProgress;

    match flash(&config, &mut progress).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_error(&format!("flash failed: {e}"));
            ExitCode::FAILURE
        }
    }
}
