//! Filesystem access behind a trait so collectors can be fed from a mock.

use std::io;
use std::path::Path;

/// Read-only filesystem operations the collectors need.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_real_fs_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "MemTotal: 1 kB").unwrap();

        let fs = RealFs::new();
        assert_eq!(fs.read_to_string(file.path()).unwrap(), "MemTotal: 1 kB");
    }

    #[test]
    fn test_real_fs_missing_file() {
        let fs = RealFs::new();
        let err = fs
            .read_to_string(Path::new("/definitely/not/here"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
