//! Command line, environment and config file settings.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap::builder::BoolishValueParser;
use serde::Deserialize;

use metrix_core::config::{self, ConfigError, pick};
use metrix_core::security::TrustedSubnet;
use metrix_core::storage::{BackendConfig, FlushPolicy};

const DEFAULT_ADDRESS: &str = "localhost:8080";
const DEFAULT_STORE_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_STORE_FILE: &str = "/tmp/metrics-db.json";

/// Metrics collection server.
#[derive(Parser, Debug, Default)]
#[command(name = "metrix-server", about = "Metrics collection server", version = metrix_core::VERSION)]
pub(crate) struct Args {
    /// HTTP listen address.
    #[arg(short, long, env = "ADDRESS")]
    pub address: Option<String>,

    /// gRPC listen address. The RPC listener is disabled when unset.
    #[arg(long, env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Seconds between snapshot dumps; 0 writes through on every update.
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    pub store_interval: Option<u64>,

    /// Snapshot file path. An empty value disables the file backend.
    #[arg(short = 'f', long = "file-storage-path", env = "FILE_STORAGE_PATH")]
    pub store_file: Option<String>,

    /// Load the snapshot file on startup.
    #[arg(short, long, env = "RESTORE", num_args = 0..=1, default_missing_value = "true",
          value_parser = BoolishValueParser::new())]
    pub restore: Option<bool>,

    /// PostgreSQL connection string; takes precedence over the file backend.
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// Shared secret for HashSHA256 integrity tags.
    #[arg(short, long, env = "KEY")]
    pub key: Option<String>,

    /// PEM private key for decrypting agent payloads.
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// CIDR of agents allowed to connect, checked against X-Real-IP.
    #[arg(short, long, env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

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

/// Config file shape. Keys mirror the long flag names.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct FileConfig {
    pub address: Option<String>,
    pub grpc_address: Option<String>,
    #[serde(with = "humantime_serde")]
    pub store_interval: Option<Duration>,
    pub store_file: Option<String>,
    pub restore: Option<bool>,
    pub database_dsn: Option<String>,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    pub address: String,
    pub grpc_address: Option<String>,
    pub backend: BackendConfig,
    pub key: Option<String>,
    pub crypto_key: Option<PathBuf>,
    pub trusted_subnet: Option<TrustedSubnet>,
}

impl Settings {
    pub fn load(args: Args) -> Result<Self, ConfigError> {
        let file: FileConfig = config::load_optional(args.config.as_deref())?;
        Self::resolve(args, file)
    }

    pub fn resolve(args: Args, file: FileConfig) -> Result<Self, ConfigError> {
        let store_interval = pick(
            args.store_interval.map(Duration::from_secs),
            file.store_interval,
            DEFAULT_STORE_INTERVAL,
        );
        let store_file = pick(args.store_file, file.store_file, DEFAULT_STORE_FILE.to_string());
        let restore = pick(args.restore, file.restore, true);

        let backend = match args.database_dsn.or(file.database_dsn) {
            Some(dsn) if !dsn.is_empty() => BackendConfig::Postgres { dsn },
            _ if !store_file.is_empty() => BackendConfig::File {
                path: PathBuf::from(store_file),
                restore,
                policy: FlushPolicy::from_interval(store_interval),
            },
            _ => BackendConfig::Memory,
        };

        let trusted_subnet = args
            .trusted_subnet
            .or(file.trusted_subnet)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<TrustedSubnet>().map_err(|e| ConfigError::Invalid {
                    key: "trusted_subnet",
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            address: pick(args.address, file.address, DEFAULT_ADDRESS.to_string()),
            grpc_address: args.grpc_address.or(file.grpc_address).filter(|a| !a.is_empty()),
            backend,
            key: args.key.or(file.key).filter(|k| !k.is_empty()),
            crypto_key: args.crypto_key.or(file.crypto_key),
            trusted_subnet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::resolve(Args::default(), FileConfig::default()).unwrap();
        assert_eq!(s.address, "localhost:8080");
        assert_eq!(
            s.backend,
            BackendConfig::File {
                path: PathBuf::from("/tmp/metrics-db.json"),
                restore: true,
                policy: FlushPolicy::Interval(Duration::from_secs(300)),
            }
        );
        assert!(s.key.is_none());
        assert!(s.grpc_address.is_none());
        assert!(s.trusted_subnet.is_none());
    }

    #[test]
    fn test_flag_beats_file() {
        let args = Args {
            address: Some("0.0.0.0:9000".into()),
            store_interval: Some(0),
            ..Args::default()
        };
        let file = FileConfig {
            address: Some("localhost:1".into()),
            store_interval: Some(Duration::from_secs(1)),
            restore: Some(false),
            ..FileConfig::default()
        };
        let s = Settings::resolve(args, file).unwrap();
        assert_eq!(s.address, "0.0.0.0:9000");
        assert!(matches!(
            s.backend,
            BackendConfig::File {
                restore: false,
                policy: FlushPolicy::Immediate,
                ..
            }
        ));
    }

    #[test]
    fn test_backend_selection() {
        let args = Args {
            database_dsn: Some("host=db".into()),
            ..Args::default()
        };
        let s = Settings::resolve(args, FileConfig::default()).unwrap();
        assert_eq!(s.backend, BackendConfig::Postgres { dsn: "host=db".into() });

        let args = Args {
            store_file: Some(String::new()),
            ..Args::default()
        };
        let s = Settings::resolve(args, FileConfig::default()).unwrap();
        assert_eq!(s.backend, BackendConfig::Memory);
    }

    #[test]
    fn test_invalid_subnet_rejected() {
        let args = Args {
            trusted_subnet: Some("10.0.0.0/99".into()),
            ..Args::default()
        };
        assert!(matches!(
            Settings::resolve(args, FileConfig::default()),
            Err(ConfigError::Invalid { key: "trusted_subnet", .. })
        ));
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "metrix-server", "-a", ":9090", "-i", "0", "-r", "false", "-k", "secret",
        ])
        .unwrap();
        assert_eq!(args.address.as_deref(), Some(":9090"));
        assert_eq!(args.store_interval, Some(0));
        assert_eq!(args.restore, Some(false));
        assert_eq!(args.key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_file_config_keys() {
        let file: FileConfig = serde_json::from_str(
            r#"{"address":"localhost:8080","restore":true,"store_interval":"1s",
                "store_file":"/path/to/file.db","database_dsn":"","crypto_key":"/path/to/key.pem"}"#,
        )
        .unwrap();
        assert_eq!(file.store_interval, Some(Duration::from_secs(1)));
        assert_eq!(file.crypto_key, Some(PathBuf::from("/path/to/key.pem")));
    }
}
