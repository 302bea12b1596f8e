//! SPI Frame Reader
//!
//! Pulls packets from the Artix-7 SPI-slave streamer in kernel-buffer sized
//! bursts and checks sequence continuity and payload integrity.
//!
//! Usage:
//!   spi-frame-reader                        # /dev/spidev1.0 @ 40 MHz, 1 packet
//!   spi-frame-reader -d /dev/spidev1.1      # another device
//!   spi-frame-reader -s 20000000 -c 100000  # 20 MHz, 100k packets
//!   spi-frame-reader -c 0 -H                # run until Ctrl-C, halt on first error
//!   spi-frame-reader --sim --sim-drop-every 1000 -c 10000
//!
//! The FPGA must be running the matching sender design.

use anyhow::{Context, Result};
use frame_link::{
    EventSink, LinkError, LinkInfo, RunController, RunOutcome, SimulatedStreamer, SpiSettings,
    Transport,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub mod cli;
#[cfg(target_os = "linux")]
pub mod device;
pub mod logging;

pub use cli::Cli;

/// Open the transport the command line asks for
pub fn open_transport(
    cli: &Cli,
    settings: &SpiSettings,
    max_transfer_bytes: usize,
) -> frame_link::Result<Box<dyn Transport>> {
    if cli.sim {
        let faults = cli.fault_plan();
        info!("Using simulated streamer (faults: {:?})", faults);
        return Ok(Box::new(SimulatedStreamer::with_faults(
            max_transfer_bytes,
            faults,
        )));
    }
    open_device(cli, settings, max_transfer_bytes)
}

#[cfg(target_os = "linux")]
fn open_device(
    cli: &Cli,
    settings: &SpiSettings,
    max_transfer_bytes: usize,
) -> frame_link::Result<Box<dyn Transport>> {
    let transport = device::SpidevTransport::open(&cli.device, settings, max_transfer_bytes)?;
    Ok(Box::new(transport))
}

#[cfg(not(target_os = "linux"))]
fn open_device(
    cli: &Cli,
    _settings: &SpiSettings,
    _max_transfer_bytes: usize,
) -> frame_link::Result<Box<dyn Transport>> {
    Err(LinkError::Transport(format!(
        "{}: spidev is only available on Linux, use --sim",
        cli.device.display()
    )))
}

/// Configure, run and report one link test
///
/// The transport is closed before this returns, whatever the outcome.
pub fn execute<S: EventSink + ?Sized>(
    cli: &Cli,
    shutdown: Arc<AtomicBool>,
    sink: &mut S,
) -> Result<RunOutcome> {
    let settings = cli.spi_settings().context("invalid SPI settings")?;
    let config = cli.run_config().context("invalid run configuration")?;

    let transport = open_transport(cli, &settings, config.max_transfer_bytes)
        .with_context(|| format!("opening {}", cli.device.display()))?;

    let link = LinkInfo {
        device: if cli.sim {
            "simulator".to_string()
        } else {
            cli.device.display().to_string()
        },
        settings,
    };
    let mut controller = RunController::new(transport, config)
        .context("invalid transfer ceiling")?
        .with_shutdown(shutdown)
        .with_link(link);
    let result = controller.run(sink);
    drop(controller);

    let outcome = result.context("SPI transfer failed")?;

    if let Some(path) = &cli.summary_json {
        outcome
            .summary()
            .write_json(path)
            .with_context(|| format!("writing summary to {}", path.display()))?;
        info!("Summary written to {}", path.display());
    }

    Ok(outcome)
}

/// Convenience check used by `main` for the exit status
pub fn is_config_error(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<LinkError>(),
        Some(LinkError::InvalidConfig(_)) | Some(LinkError::PacketTooLarge { .. })
    )
}
