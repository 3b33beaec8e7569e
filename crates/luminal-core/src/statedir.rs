//! State directory
//!
//! Single-writer, plain-file persistence root. Every artifact in here is
//! replaced atomically (sibling temp file, flush, rename) so a reader at
//! any instant sees either the previous or the next full state, never a
//! torn one. A pid file under an exclusive advisory lock keeps a second
//! engine instance out.
//!
//! Layout:
//!
//! ```text
//! state/
//!   offsets/<filename>           committed byte offset per source log
//!   scales/<scale>/entries.jsonl append-mostly, compacted at checkpoints
//!   checkpoints/<id>/state.json  full snapshots
//!   checkpoints/index.json       ordered checkpoint index
//!   checkpoints/latest           pointer file
//!   checkpoints/archive/         zstd-compressed retired snapshots
//!   realtime/*.json              projector outputs for external tools
//!   briefing.md                  human-readable session briefing
//!   backfill_complete            backfill sentinel
//!   pid.lock                     exclusive-locked pid file
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::hierarchy::{MemoryEntry, MemoryScale, TemporalHierarchy};

// ============================================================================
// STATE DIRECTORY
// ============================================================================

/// Handle to the engine's state directory. Holding the handle after
/// [`StateDir::lock`] means holding the single-writer lock.
#[derive(Debug)]
pub struct StateDir {
    root: PathBuf,
    lock_file: Option<File>,
}

impl StateDir {
    /// Open (creating if needed) a state directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        fs::create_dir_all(root.join("offsets"))?;
        for scale in MemoryScale::ALL {
            fs::create_dir_all(root.join("scales").join(scale.as_str()))?;
        }
        fs::create_dir_all(root.join("checkpoints"))?;
        fs::create_dir_all(root.join("checkpoints").join("archive"))?;
        fs::create_dir_all(root.join("realtime"))?;

        // Owner-only on Unix; this directory holds a private conversation.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            let _ = fs::set_permissions(&root, perms);
        }

        Ok(Self {
            root,
            lock_file: None,
        })
    }

    /// The default platform state directory.
    pub fn default_root() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("com", "luminal", "engine").ok_or_else(|| {
            EngineError::Config("could not determine platform state directory".to_string())
        })?;
        Ok(dirs.data_dir().join("state"))
    }

    /// Resolve the state root: explicit flag, then `STATE_DIR`, then the
    /// platform default.
    pub fn resolve_root(flag: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(p) = flag {
            return Ok(p);
        }
        if let Ok(p) = std::env::var("STATE_DIR") {
            return Ok(PathBuf::from(p));
        }
        Self::default_root()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========================================================================
    // LOCKING
    // ========================================================================

    /// Take the exclusive single-writer lock, writing our pid into the
    /// lock file. Fails with [`EngineError::LockContention`] when another
    /// live process holds it.
    pub fn lock(&mut self) -> Result<()> {
        let path = self.pid_lock_path();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(EngineError::LockContention(path));
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        self.lock_file = Some(file);
        debug!(path = %path.display(), "state directory locked");
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.lock_file.is_some()
    }

    // ========================================================================
    // PATHS
    // ========================================================================

    pub fn pid_lock_path(&self) -> PathBuf {
        self.root.join("pid.lock")
    }

    pub fn offsets_dir(&self) -> PathBuf {
        self.root.join("offsets")
    }

    pub fn scale_log_path(&self, scale: MemoryScale) -> PathBuf {
        self.root
            .join("scales")
            .join(scale.as_str())
            .join("entries.jsonl")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn realtime_path(&self, name: &str) -> PathBuf {
        self.root.join("realtime").join(name)
    }

    pub fn briefing_path(&self) -> PathBuf {
        self.root.join("briefing.md")
    }

    pub fn backfill_sentinel_path(&self) -> PathBuf {
        self.root.join("backfill_complete")
    }

    // ========================================================================
    // SENTINELS
    // ========================================================================

    pub fn backfill_complete(&self) -> bool {
        self.backfill_sentinel_path().exists()
    }

    pub fn mark_backfill_complete(&self) -> Result<()> {
        atomic_write(
            &self.backfill_sentinel_path(),
            chrono::Utc::now().to_rfc3339().as_bytes(),
        )
    }

    // ========================================================================
    // SCALE LOGS
    // ========================================================================

    /// Append one serialized entry to a scale's JSONL log.
    pub fn append_scale_entry(&self, scale: MemoryScale, json_line: &str) -> Result<()> {
        let path = self.scale_log_path(scale);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(json_line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Read a scale's JSONL log back into entries. The logs are the
    /// durable record between checkpoints, so restore replays them;
    /// lines that fail to parse are skipped with a warning rather than
    /// poisoning the whole recovery.
    pub fn read_scale_log(&self, scale: MemoryScale) -> Result<Vec<MemoryEntry>> {
        let path = self.scale_log_path(scale);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        let mut entries = Vec::new();
        for (number, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    scale = %scale,
                    line = number + 1,
                    error = %e,
                    "unreadable scale log line skipped during replay"
                ),
            }
        }
        Ok(entries)
    }

    /// Rewrite every scale log from the live hierarchy (checkpoint-time
    /// compaction).
    pub fn compact_scale_logs(&self, hierarchy: &TemporalHierarchy) -> Result<()> {
        for scale in MemoryScale::ALL {
            let mut buffer = Vec::new();
            for entry in hierarchy.scale(scale).entries() {
                serde_json::to_writer(&mut buffer, entry)?;
                buffer.push(b'\n');
            }
            atomic_write(&self.scale_log_path(scale), &buffer)?;
        }
        Ok(())
    }
}

// ============================================================================
// ATOMIC WRITE
// ============================================================================

/// Atomically replace `path` with `bytes`: write a sibling temp file,
/// flush and sync it, then rename over the target.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        EngineError::Io(std::io::Error::other(format!(
            "no parent directory for {}",
            path.display()
        )))
    })?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let tmp = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    Ok(())
}

/// Atomic write that reports the failing target for fan-out semantics.
pub fn atomic_write_target(path: &Path, bytes: &[u8]) -> Result<()> {
    atomic_write(path, bytes).map_err(|e| match e {
        EngineError::Io(source) => EngineError::StateIo {
            target: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::open(dir.path().join("state")).unwrap();
        assert!(state.offsets_dir().is_dir());
        assert!(state.checkpoints_dir().is_dir());
        for scale in MemoryScale::ALL {
            assert!(state.scale_log_path(scale).parent().unwrap().is_dir());
        }
    }

    #[test]
    fn test_atomic_write_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        atomic_write(&path, b"{\"v\":1}").unwrap();
        atomic_write(&path, b"{\"v\":2}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"v\":2}");
        // No temp droppings left behind.
        let residue: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("tmp"))
            .collect();
        assert!(residue.is_empty());
    }

    #[test]
    fn test_lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = StateDir::open(dir.path().join("state")).unwrap();
        first.lock().unwrap();
        assert!(first.is_locked());

        let mut second = StateDir::open(dir.path().join("state")).unwrap();
        let err = second.lock().unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut holder = StateDir::open(dir.path().join("state")).unwrap();
            holder.lock().unwrap();
        }
        let mut next = StateDir::open(dir.path().join("state")).unwrap();
        assert!(next.lock().is_ok());
    }

    #[test]
    fn test_backfill_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::open(dir.path().join("state")).unwrap();
        assert!(!state.backfill_complete());
        state.mark_backfill_complete().unwrap();
        assert!(state.backfill_complete());
    }

    #[test]
    fn test_scale_log_read_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::open(dir.path().join("state")).unwrap();
        let entry = MemoryEntry {
            entry_id: "e1".into(),
            kind: crate::hierarchy::EntryKind::RawMessage,
            content: "recoverable".into(),
            timestamp: chrono::Utc::now(),
            affect: None,
            importance: 0.0,
            access_count: 0,
            last_accessed: chrono::Utc::now(),
            refs: Vec::new(),
            session_id: "a.log".into(),
            landmark: false,
            relationship_delta: 0.0,
        };
        state
            .append_scale_entry(
                MemoryScale::Immediate,
                &serde_json::to_string(&entry).unwrap(),
            )
            .unwrap();
        state
            .append_scale_entry(MemoryScale::Immediate, "{torn write")
            .unwrap();

        let replayed = state.read_scale_log(MemoryScale::Immediate).unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].entry_id, "e1");
    }

    #[test]
    fn test_scale_log_append_and_compact() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::open(dir.path().join("state")).unwrap();
        state
            .append_scale_entry(MemoryScale::Immediate, "{\"entryId\":\"a\"}")
            .unwrap();
        state
            .append_scale_entry(MemoryScale::Immediate, "{\"entryId\":\"b\"}")
            .unwrap();
        let content = fs::read_to_string(state.scale_log_path(MemoryScale::Immediate)).unwrap();
        assert_eq!(content.lines().count(), 2);

        let hierarchy = TemporalHierarchy::new(&crate::config::ScalesConfig::default());
        state.compact_scale_logs(&hierarchy).unwrap();
        let content = fs::read_to_string(state.scale_log_path(MemoryScale::Immediate)).unwrap();
        assert!(content.is_empty());
    }
}
