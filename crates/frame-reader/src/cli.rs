//! Command-line configuration

use clap::Parser;
use frame_link::{
    FaultPlan, LinkError, Result, RunConfig, SpiMode, SpiSettings, Verbosity,
    DEFAULT_MAX_TRANSFER_BYTES,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_DEVICE: &str = "/dev/spidev1.0";
pub const DEFAULT_SPEED_HZ: u32 = 40_000_000;
pub const DEFAULT_PACKET_COUNT: u64 = 1;

/// Where the spidev driver publishes its per-transfer buffer size
pub const SPIDEV_BUFSIZ_PATH: &str = "/sys/module/spidev/parameters/bufsiz";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "spi-frame-reader",
    version,
    about = "Stream packets from the FPGA SPI-slave streamer and report link errors",
    after_help = "Verbosity above 1 reduces the achievable bandwidth."
)]
pub struct Cli {
    /// SPI device node
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    pub device: PathBuf,

    /// SPI clock speed in Hz
    #[arg(short, long, default_value_t = DEFAULT_SPEED_HZ,
          value_parser = clap::value_parser!(u32).range(1..))]
    pub speed: u32,

    /// Packets to receive (0 = run until interrupted)
    #[arg(short, long, default_value_t = DEFAULT_PACKET_COUNT)]
    pub count: u64,

    /// 0=total run, 1=report errors, 2=each burst, 3=each packet, 4=raw data
    #[arg(short, long, default_value_t = 1,
          value_parser = clap::value_parser!(u8).range(0..=4))]
    pub verbosity: u8,

    /// Halt on first sequence or data error and print the offending packet
    #[arg(short = 'H', long)]
    pub halt: bool,

    /// SPI clock mode
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub mode: u8,

    /// Chip select active high
    #[arg(long)]
    pub cs_high: bool,

    /// SPI word width in bits
    #[arg(long, default_value_t = 32, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub bits: u8,

    /// Transaction ceiling in bytes (default: spidev bufsiz)
    #[arg(long)]
    pub max_xfer: Option<usize>,

    /// Also write the run summary as JSON
    #[arg(long)]
    pub summary_json: Option<PathBuf>,

    /// Use the simulated streamer instead of a spidev device
    #[arg(long)]
    pub sim: bool,

    /// Simulator: lose every Nth packet
    #[arg(long, requires = "sim")]
    pub sim_drop_every: Option<u64>,

    /// Simulator: corrupt every Nth packet
    #[arg(long, requires = "sim")]
    pub sim_corrupt_every: Option<u64>,

    /// Simulator: restart numbering on every transfer
    #[arg(long, requires = "sim")]
    pub sim_reset_per_transfer: bool,
}

impl Cli {
    pub fn report_verbosity(&self) -> Result<Verbosity> {
        Verbosity::from_level(self.verbosity)
    }

    pub fn spi_settings(&self) -> Result<SpiSettings> {
        let settings = SpiSettings::new()
            .mode(SpiMode::from_index(self.mode)?)
            .cs_active_high(self.cs_high)
            .bits_per_word(self.bits)
            .speed_hz(self.speed);
        settings.validate()?;
        Ok(settings)
    }

    /// Explicit `--max-xfer`, else the driver's bufsiz, else 4096
    pub fn max_transfer_bytes(&self) -> Result<usize> {
        let bytes = match self.max_xfer {
            Some(bytes) => bytes,
            None => read_spidev_bufsiz(SPIDEV_BUFSIZ_PATH).unwrap_or(DEFAULT_MAX_TRANSFER_BYTES),
        };
        if bytes == 0 {
            return Err(LinkError::InvalidConfig(
                "transfer ceiling must be greater than 0".to_string(),
            ));
        }
        Ok(bytes)
    }

    pub fn run_config(&self) -> Result<RunConfig> {
        Ok(RunConfig::new()
            .packet_count(self.count)
            .halt_on_error(self.halt)
            .max_transfer_bytes(self.max_transfer_bytes()?))
    }

    pub fn fault_plan(&self) -> FaultPlan {
        FaultPlan::new()
            .drop_every(self.sim_drop_every.unwrap_or(0))
            .corrupt_every(self.sim_corrupt_every.unwrap_or(0))
            .reset_per_transfer(self.sim_reset_per_transfer)
    }
}

/// Read the spidev module's `bufsiz` parameter
pub fn read_spidev_bufsiz(path: impl AsRef<Path>) -> Option<usize> {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(text) => text.trim().parse().ok(),
        Err(e) => {
            debug!("No spidev bufsiz at {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_link::HaltPolicy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["spi-frame-reader"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["--max-xfer", "4096"]);
        assert_eq!(cli.device, PathBuf::from("/dev/spidev1.0"));
        assert_eq!(cli.speed, 40_000_000);
        assert_eq!(cli.count, 1);
        assert_eq!(cli.report_verbosity().unwrap(), Verbosity::Errors);

        let settings = cli.spi_settings().unwrap();
        assert_eq!(settings.mode, SpiMode::Mode0);
        assert_eq!(settings.bits_per_word, 32);
        assert!(!settings.cs_active_high);

        let config = cli.run_config().unwrap();
        assert_eq!(config.halt, HaltPolicy::Continue);
        assert_eq!(config.max_transfer_bytes, 4096);
    }

    #[test]
    fn test_short_flags() {
        let cli = parse(&["-d", "/dev/spidev1.1", "-s", "20000000", "-c", "0", "-v", "3", "-H"]);
        assert_eq!(cli.device, PathBuf::from("/dev/spidev1.1"));
        assert_eq!(cli.speed, 20_000_000);
        assert_eq!(cli.report_verbosity().unwrap(), Verbosity::Packets);
        assert!(cli.halt);
        assert_eq!(cli.run_config().unwrap().target(), None);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let argv = |extra: &[&str]| {
            let mut v = vec!["spi-frame-reader"];
            v.extend_from_slice(extra);
            Cli::try_parse_from(v)
        };
        assert!(argv(&["-s", "0"]).is_err());
        assert!(argv(&["--mode", "4"]).is_err());
        assert!(argv(&["-v", "5"]).is_err());
        assert!(argv(&["--bits", "0"]).is_err());
        assert!(argv(&["--sim-drop-every", "3"]).is_err());
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let cli = parse(&["--max-xfer", "0"]);
        assert!(cli.run_config().is_err());
    }

    #[test]
    fn test_fault_plan() {
        let cli = parse(&["--sim", "--sim-drop-every", "7", "--sim-reset-per-transfer"]);
        let plan = cli.fault_plan();
        assert_eq!(plan.drop_every, Some(7));
        assert_eq!(plan.corrupt_every, None);
        assert!(plan.reset_per_transfer);
        assert!(parse(&["--sim"]).fault_plan().is_clean());
    }

    #[test]
    fn test_read_bufsiz() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "65536").unwrap();
        assert_eq!(read_spidev_bufsiz(file.path()), Some(65_536));

        assert_eq!(read_spidev_bufsiz("/nonexistent/bufsiz"), None);
    }
}
