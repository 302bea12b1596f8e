//! Tracing setup

use frame_link::Verbosity;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(verbosity: Verbosity) -> String {
    let level = match verbosity {
        Verbosity::Summary | Verbosity::Errors => "info",
        Verbosity::Bursts => "debug",
        Verbosity::Packets | Verbosity::Raw => "trace",
    };
    format!("frame_reader={0},frame_link={0},warn", level)
}

/// Install the global subscriber. Logs go to stderr, the report to stdout.
pub fn init_logging(verbosity: Verbosity) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_follows_verbosity() {
        assert_eq!(
            default_filter(Verbosity::Errors),
            "frame_reader=info,frame_link=info,warn"
        );
        assert!(default_filter(Verbosity::Bursts).starts_with("frame_reader=debug"));
        assert!(default_filter(Verbosity::Raw).contains("frame_link=trace"));
    }
}
