//! Linux spidev transport

use frame_link::{LinkError, Result, SpiMode, SpiSettings, Transport};
use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configured `/dev/spidevX.Y` handle. Closed on drop.
pub struct SpidevTransport {
    spi: Spidev,
    path: PathBuf,
    max_transfer_bytes: usize,
}

impl SpidevTransport {
    /// Open the device node and apply mode, word width and clock
    pub fn open(
        path: impl AsRef<Path>,
        settings: &SpiSettings,
        max_transfer_bytes: usize,
    ) -> Result<Self> {
        settings.validate()?;
        let path = path.as_ref();

        let mut spi = Spidev::open(path)
            .map_err(|e| LinkError::Transport(format!("open {}: {}", path.display(), e)))?;

        let options = SpidevOptions::new()
            .mode(mode_flags(settings))
            .bits_per_word(settings.bits_per_word)
            .max_speed_hz(settings.speed_hz)
            .build();
        spi.configure(&options)
            .map_err(|e| LinkError::Transport(format!("configure {}: {}", path.display(), e)))?;

        info!(
            "Opened {} ({}, CS active {}, {} bit words, {} Hz)",
            path.display(),
            settings.mode,
            if settings.cs_active_high { "high" } else { "low" },
            settings.bits_per_word,
            settings.speed_hz
        );

        Ok(Self {
            spi,
            path: path.to_path_buf(),
            max_transfer_bytes,
        })
    }
}

impl Transport for SpidevTransport {
    fn max_transfer_bytes(&self) -> usize {
        self.max_transfer_bytes
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        if tx.len() != rx.len() {
            return Err(LinkError::BufferSizeMismatch {
                expected: rx.len(),
                actual: tx.len(),
            });
        }
        debug!("SPI_IOC_MESSAGE {} bytes on {}", rx.len(), self.path.display());

        let mut transfer = SpidevTransfer::read_write(tx, rx);
        self.spi.transfer(&mut transfer).map_err(|e| {
            LinkError::Transport(format!("SPI_IOC_MESSAGE on {}: {}", self.path.display(), e))
        })
    }
}

fn mode_flags(settings: &SpiSettings) -> SpiModeFlags {
    let mut flags = match settings.mode {
        SpiMode::Mode0 => SpiModeFlags::SPI_MODE_0,
        SpiMode::Mode1 => SpiModeFlags::SPI_MODE_1,
        SpiMode::Mode2 => SpiModeFlags::SPI_MODE_2,
        SpiMode::Mode3 => SpiModeFlags::SPI_MODE_3,
    };
    if settings.cs_active_high {
        flags |= SpiModeFlags::SPI_CS_HIGH;
    }
    flags
}
