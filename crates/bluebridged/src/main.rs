//! bluebridged: runs the bridge host on a Linux HCI user channel
//!
//! ```text
//! bluebridged [--hci N] [--data-dir PATH]
//! ```
//!
//! The adapter must be down (`hciconfig hciN down`) so the user channel can
//! be bound. Logging follows `RUST_LOG`.

mod board;

use anyhow::{Context, Result};
use bluebridge::{Collaborators, FileStorage, HciSocket, Host, HostConfig};
use board::{FilePlatform, LogBridge, PassiveDriver, ReportScanner};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Longest wait for a controller frame before the jobs run again
const POLL_TIMEOUT: Duration = Duration::from_millis(5);
const HOUSEKEEPING_PERIOD: Duration = Duration::from_millis(20);

/// Bridges Bluetooth game controllers through a Linux HCI adapter
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Adapter index, `1` or `hci1`
    #[arg(long, default_value_t = 0, value_parser = parse_device)]
    hci: u16,
    /// Directory holding keys, configuration and the memory card image
    #[arg(long, default_value = "bluebridge-data")]
    data_dir: PathBuf,
}

fn parse_device(value: &str) -> Result<u16, String> {
    value
        .strip_prefix("hci")
        .unwrap_or(value)
        .parse()
        .map_err(|_| format!("bad device index {value:?}"))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let socket = Arc::new(
        HciSocket::open(args.hci)
            .with_context(|| format!("cannot bind the user channel of hci{}", args.hci))?,
    );
    let storage = Arc::new(
        FileStorage::new(&args.data_dir)
            .with_context(|| format!("cannot use {}", args.data_dir.display()))?,
    );
    let collaborators = Collaborators {
        parser: Arc::new(ReportScanner),
        bridge: Arc::new(LogBridge),
        driver: Arc::new(PassiveDriver),
        platform: Arc::new(FilePlatform::new(&args.data_dir)),
    };

    let mut host = Host::new(HostConfig::default(), socket.clone(), storage, collaborators);
    info!("hci{}: data in {}", args.hci, args.data_dir.display());
    host.start()?;

    let mut next_jobs = Instant::now() + HOUSEKEEPING_PERIOD;
    loop {
        match socket.read_frame(POLL_TIMEOUT) {
            Ok(Some(frame)) => host.on_controller_frame(&frame),
            Ok(None) => {}
            Err(e) => return Err(e).context("controller link lost"),
        }
        // The user channel takes a frame whenever the socket is writable
        while host.on_controller_ready() {}

        let now = Instant::now();
        if now >= next_jobs {
            host.housekeeping_at(now);
            let sent = host.drain_feedback();
            if sent > 0 {
                tracing::trace!("{} feedback reports sent", sent);
            }
            next_jobs = now + HOUSEKEEPING_PERIOD;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("bluebridged").chain(args.iter().copied()))
    }

    #[test]
    fn test_args_defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.hci, 0);
        assert_eq!(args.data_dir, PathBuf::from("bluebridge-data"));
    }

    #[test]
    fn test_args_device_and_dir() {
        let args = parse(&["--hci", "hci1", "--data-dir", "/var/lib/bb"]).unwrap();
        assert_eq!(args.hci, 1);
        assert_eq!(args.data_dir, PathBuf::from("/var/lib/bb"));
        assert_eq!(parse(&["--hci", "2"]).unwrap().hci, 2);
    }

    #[test]
    fn test_args_rejects_unknown() {
        assert!(parse(&["--verbose"]).is_err());
        assert!(parse(&["--hci"]).is_err());
        assert!(parse(&["--hci", "x"]).is_err());
        assert!(parse(&["--hci", "hcix"]).is_err());
    }
}
