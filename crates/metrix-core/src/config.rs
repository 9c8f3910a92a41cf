//! JSON config file loading.
//!
//! Both binaries resolve settings as flag > environment > config file >
//! default. This module covers the file layer: it reads a JSON object into
//! the binary's own settings struct, where every field is optional.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let data = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded config file");
    Ok(parsed)
}

/// Loads the file when a path is given, otherwise the all-unset default.
pub fn load_optional<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T, ConfigError> {
    match path {
        Some(path) => load_file(path),
        None => Ok(T::default()),
    }
}

/// Picks the first value that is set, in precedence order.
pub fn pick<T>(flag_or_env: Option<T>, file: Option<T>, default: T) -> T {
    flag_or_env.or(file).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Default, Deserialize)]
    struct Sample {
        address: Option<String>,
        #[serde(default, with = "humantime_serde")]
        store_interval: Option<Duration>,
        restore: Option<bool>,
    }

    #[test]
    fn test_load_file_with_durations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"address":"localhost:9090","store_interval":"1s"}"#).unwrap();

        let cfg: Sample = load_file(&path).unwrap();
        assert_eq!(cfg.address.as_deref(), Some("localhost:9090"));
        assert_eq!(cfg.store_interval, Some(Duration::from_secs(1)));
        assert_eq!(cfg.restore, None);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{").unwrap();

        assert!(matches!(load_file::<Sample>(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            load_file::<Sample>(&dir.path().join("absent.json")),
            Err(ConfigError::Read { .. })
        ));
        assert!(load_optional::<Sample>(None).unwrap().address.is_none());
    }

    #[test]
    fn test_pick_precedence() {
        assert_eq!(pick(Some(1), Some(2), 3), 1);
        assert_eq!(pick(None, Some(2), 3), 2);
        assert_eq!(pick(None, None, 3), 3);
    }
}
