//! Duplex transport seam
//!
//! The link only needs one operation from the hardware: a blocking
//! full-duplex transaction of a bounded size. Opening and configuring the
//! device happens before a [`Transport`] exists.

use crate::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bulk synchronous read/write channel
pub trait Transport {
    /// Largest single transaction the driver accepts, in bytes
    fn max_transfer_bytes(&self) -> usize;

    /// Clock `tx` out while filling `rx`. Both slices have the same length.
    ///
    /// Either every byte of `rx` is written or an error is returned.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn max_transfer_bytes(&self) -> usize {
        (**self).max_transfer_bytes()
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        (**self).transfer(tx, rx)
    }
}

/// SPI clock polarity/phase mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpiMode {
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

impl SpiMode {
    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            0 => Ok(SpiMode::Mode0),
            1 => Ok(SpiMode::Mode1),
            2 => Ok(SpiMode::Mode2),
            3 => Ok(SpiMode::Mode3),
            other => Err(LinkError::InvalidConfig(format!(
                "SPI mode must be 0-3, got {}",
                other
            ))),
        }
    }

    pub fn index(&self) -> u8 {
        match self {
            SpiMode::Mode0 => 0,
            SpiMode::Mode1 => 1,
            SpiMode::Mode2 => 2,
            SpiMode::Mode3 => 3,
        }
    }
}

impl fmt::Display for SpiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SPI_MODE_{}", self.index())
    }
}

/// Link parameters agreed with the FPGA design
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiSettings {
    pub mode: SpiMode,
    /// Chip select active high (FPGA currently expects active low)
    pub cs_active_high: bool,
    /// 32 is the widest word the spidev driver accepts
    pub bits_per_word: u8,
    pub speed_hz: u32,
}

impl Default for SpiSettings {
    fn default() -> Self {
        Self {
            mode: SpiMode::Mode0,
            cs_active_high: false,
            bits_per_word: 32,
            speed_hz: 40_000_000,
        }
    }
}

impl SpiSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: SpiMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cs_active_high(mut self, high: bool) -> Self {
        self.cs_active_high = high;
        self
    }

    pub fn bits_per_word(mut self, bits: u8) -> Self {
        self.bits_per_word = bits;
        self
    }

    pub fn speed_hz(mut self, hz: u32) -> Self {
        self.speed_hz = hz;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.speed_hz == 0 {
            return Err(LinkError::InvalidConfig(
                "SPI clock speed must be greater than 0".to_string(),
            ));
        }
        if self.bits_per_word == 0 || self.bits_per_word > 32 {
            return Err(LinkError::InvalidConfig(format!(
                "bits per word must be 1-32, got {}",
                self.bits_per_word
            )));
        }
        Ok(())
    }
}

/// Which link a run was made on, recorded in the run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    /// Device node, or `simulator`
    pub device: String,
    pub settings: SpiSettings,
}
