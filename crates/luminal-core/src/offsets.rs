//! Committed read offsets
//!
//! One small text file per source log, holding the byte offset up to
//! which that log has been durably handed downstream. Offsets advance
//! only after the consumer accepted the messages, so a crash between
//! emit and commit replays a suffix: duplicates, never gaps. Offsets
//! are monotonic by construction.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;
use crate::statedir::atomic_write;

// ============================================================================
// OFFSET STORE
// ============================================================================

/// Durable per-file offset map.
#[derive(Debug)]
pub struct OffsetStore {
    dir: PathBuf,
    cache: HashMap<String, u64>,
}

impl OffsetStore {
    /// Open the store, loading every persisted offset into the cache.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut cache = HashMap::new();

        for item in fs::read_dir(&dir)? {
            let item = item?;
            if !item.file_type()?.is_file() {
                continue;
            }
            let name = item.file_name().to_string_lossy().to_string();
            match fs::read_to_string(item.path())
                .ok()
                .and_then(|s| s.trim().parse::<u64>().ok())
            {
                Some(offset) => {
                    cache.insert(name, offset);
                }
                None => {
                    warn!(file = %name, "unreadable offset file, treating as zero");
                }
            }
        }

        Ok(Self { dir, cache })
    }

    /// The committed offset for a source file (zero when unseen).
    pub fn get(&self, source: &str) -> u64 {
        self.cache.get(source).copied().unwrap_or(0)
    }

    /// Commit a new offset. Regressions are refused and logged: offsets
    /// are monotonic for the lifetime of the store.
    pub fn commit(&mut self, source: &str, offset: u64) -> Result<()> {
        let current = self.get(source);
        if offset < current {
            warn!(source = %source, offset, current, "refusing offset regression");
            return Ok(());
        }
        if offset == current && self.cache.contains_key(source) {
            return Ok(());
        }
        atomic_write(&self.path_for(source), format!("{offset}\n").as_bytes())?;
        self.cache.insert(source.to_string(), offset);
        Ok(())
    }

    /// Sources with a committed offset.
    pub fn sources(&self) -> impl Iterator<Item = (&str, u64)> {
        self.cache.iter().map(|(k, v)| (k.as_str(), *v))
    }

    fn path_for(&self, source: &str) -> PathBuf {
        // Source logs live flat in the watch directory, so the file name
        // is the key. Path separators cannot appear in it.
        self.dir.join(source)
    }
}

/// Extract the offset-store key for a watched path.
pub fn source_key(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().to_string())
}

// ============================================================================
// TESTS
// ============================================================================
