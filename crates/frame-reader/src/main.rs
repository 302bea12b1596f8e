//! SPI Frame Reader CLI
//!
//! Exit status: 0 when the run completes (or is interrupted with Ctrl-C),
//! 1 on a halt or transport failure, 2 on a configuration error.

use clap::Parser;
use frame_link::packet::{PACKET_BYTES, PAYLOAD_BYTES, WORDS_PER_PAYLOAD};
use frame_link::ConsoleReporter;
use frame_reader::{execute, is_config_error, logging, Cli};
use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let verbosity = match cli.report_verbosity() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = logging::init_logging(verbosity) {
        eprintln!("Error: failed to initialise logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    println!("SPI FPGA test");
    let count = match cli.count {
        0 => "forever".to_string(),
        n => n.to_string(),
    };
    println!(
        "Device {} @ {} Hz | Words per payload: {} | Receiving {} packets | Payload bytes: {} | Packet bytes: {}",
        if cli.sim { "simulator".to_string() } else { cli.device.display().to_string() },
        cli.speed,
        WORDS_PER_PAYLOAD,
        count,
        PAYLOAD_BYTES,
        PACKET_BYTES
    );

    // Raised on Ctrl-C, checked between bursts
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
        warn!("Ctrl-C handler not installed: {}", e);
    }

    let mut reporter = ConsoleReporter::new(io::stdout().lock(), verbosity);
    match execute(&cli, shutdown, &mut reporter) {
        Ok(outcome) if outcome.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if is_config_error(&e) {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
