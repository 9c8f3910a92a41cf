//! Command line, environment and config file settings.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{Parser, ValueEnum};
use serde::Deserialize;

use metrix_core::config::{self, ConfigError, pick};

const DEFAULT_ADDRESS: &str = "localhost:8080";
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Transport {
    Http,
    Grpc,
}

/// Runtime metrics agent.
#[derive(Parser, Debug, Default)]
#[command(name = "metrix-agent", about = "Runtime metrics agent", version = metrix_core::VERSION)]
pub(crate) struct Args {
    /// Server address (HTTP, or gRPC with --transport grpc).
    #[arg(short, long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Report transport.
    #[arg(long, env = "TRANSPORT", value_enum)]
    pub transport: Option<Transport>,

    /// Seconds between reports.
    #[arg(short, long, env = "REPORT_INTERVAL")]
    pub report_interval: Option<u64>,

    /// Seconds between collections.
    #[arg(short, long, env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Shared secret for HashSHA256 integrity tags.
    #[arg(short, long, env = "KEY")]
    pub key: Option<String>,

    /// PEM public key of the server for payload encryption.
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Gzip request bodies.
    #[arg(long, env = "GZIP", num_args = 0..=1, default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    pub gzip: Option<bool>,

    /// JSON config file.
    #[arg(short, long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FileConfig {
    pub address: Option<String>,
    pub transport: Option<Transport>,
    #[serde(with = "humantime_serde")]
    pub report_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub gzip: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    pub address: String,
    pub transport: Transport,
    pub report_interval: Duration,
    pub poll_interval: Duration,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub gzip: bool,
}

impl Settings {
    pub fn load(args: Args) -> Result<Self, ConfigError> {
        let file: FileConfig = config::load_optional(args.config.as_deref())?;
        Self::resolve(args, file)
    }

    pub fn resolve(args: Args, file: FileConfig) -> Result<Self, ConfigError> {
        let report_interval = pick(
            args.report_interval.map(Duration::from_secs),
            file.report_interval,
            DEFAULT_REPORT_INTERVAL,
        );
        let poll_interval = pick(
            args.poll_interval.map(Duration::from_secs),
            file.poll_interval,
            DEFAULT_POLL_INTERVAL,
        );
        for (key, value) in [("report_interval", report_interval), ("poll_interval", poll_interval)] {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(Self {
            address: pick(args.address, file.address, DEFAULT_ADDRESS.to_string()),
            transport: pick(args.transport, file.transport, Transport::Http),
            report_interval,
            poll_interval,
            key: args.key.or(file.key).filter(|k| !k.is_empty()),
            crypto_key: args.crypto_key.or(file.crypto_key),
            gzip: pick(args.gzip, file.gzip, true),
        })
    }
}
