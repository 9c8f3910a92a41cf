//! In-memory filesystem for testing collectors without a real `/proc`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::traits::FileSystem;

/// Map of path to file contents. Contents can be replaced between
/// collections to simulate counters moving.
#[derive(Debug, Default)]
pub struct MockFs {
    files: RwLock<HashMap<PathBuf, String>>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.files
            .write()
            .insert(path.as_ref().to_path_buf(), content.into());
    }

    /// A small Linux host: 16 GB RAM, one process with 12 threads.
    pub fn typical_system() -> Self {
        let fs = Self::new();
        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
",
        );
        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
cpu0 5000 250 1500 40000 500 100 50 0 0 0
cpu1 5000 250 1500 40000 500 100 50 0 0 0
ctxt 500000
",
        );
        fs.add_file(
            "/proc/self/stat",
            "4242 (metrix-agent) S 1 4242 4242 0 -1 4194560 1500 0 7 0 250 50 0 0 20 0 \
             12 0 123456 104857600 2560 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 3 0 0 0 0 0",
        );
        fs
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.read().get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("mock file not found: {}", path.display()),
            )
        })
    }
}
