//! Isolated engine environments for end-to-end tests.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use tempfile::TempDir;

use luminal_core::{
    AffectAnalyzer, AffectBackend, Config, LogWatcher, MemoryEngine, Message, OffsetStore,
    StateDir, WatcherConfig, WatcherEvent,
};

/// One test's private world: a state directory and a watch directory
/// inside a tempdir that disappears when the env is dropped.
pub struct TestEnv {
    /// Kept alive so the directories outlive the env.
    _temp: TempDir,
    pub state_root: PathBuf,
    pub watch_dir: PathBuf,
    pub config: Config,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let temp = TempDir::new().expect("tempdir");
        let state_root = temp.path().join("state");
        let watch_dir = temp.path().join("watch");
        std::fs::create_dir_all(&watch_dir).expect("watch dir");
        Self {
            _temp: temp,
            state_root,
            watch_dir,
            config,
        }
    }

    /// Build an engine over this env's state directory (takes the
    /// single-writer lock; drop the engine before building another).
    pub fn engine(&self) -> MemoryEngine {
        self.engine_with(AffectAnalyzer::rules())
    }

    pub fn engine_with(&self, analyzer: AffectAnalyzer) -> MemoryEngine {
        let mut state = StateDir::open(&self.state_root).expect("state dir");
        state.lock().expect("state lock");
        MemoryEngine::open(self.config.clone(), state, analyzer).expect("engine")
    }

    pub fn engine_with_backend(&self, backend: Box<dyn AffectBackend>) -> MemoryEngine {
        self.engine_with(AffectAnalyzer::new(backend))
    }

    /// A watcher over this env's watch directory, resuming from the
    /// persisted offsets.
    pub fn watcher(&self) -> LogWatcher {
        let state = StateDir::open(&self.state_root).expect("state dir");
        let offsets = OffsetStore::open(state.offsets_dir()).expect("offsets");
        LogWatcher::new(&self.watch_dir, offsets, WatcherConfig::default())
    }

    /// Append raw lines (newline-terminated) to a log in the watch dir.
    pub fn append_log(&self, name: &str, lines: &[String]) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.watch_dir.join(name))
            .expect("log file");
        for line in lines {
            writeln!(file, "{line}").expect("append");
        }
    }

    /// Run one watcher pass over a log and return the emitted messages.
    pub async fn drain_log(&self, watcher: &mut LogWatcher, name: &str) -> Vec<Message> {
        let path = self.watch_dir.join(name);
        let (tx, mut rx) = tokio::sync::mpsc::channel::<WatcherEvent>(4096);
        watcher.process_file(&path, &tx).await.expect("process file");
        drop(tx);

        let mut messages = Vec::new();
        while let Some(event) = rx.recv().await {
            if let WatcherEvent::Message { message, .. } = event {
                messages.push(message);
            }
        }
        messages
    }

    pub fn briefing(&self) -> String {
        std::fs::read_to_string(self.state_root.join("briefing.md")).expect("briefing")
    }

    pub fn realtime(&self, name: &str) -> serde_json::Value {
        let raw = std::fs::read_to_string(self.state_root.join("realtime").join(name))
            .expect("realtime file");
        serde_json::from_str(&raw).expect("realtime json")
    }

    /// Rewind a source file's committed offset, simulating a crash that
    /// died between emit and offset-advance.
    pub fn rewind_offset(&self, source: &str, offset: u64) {
        std::fs::write(
            self.state_root.join("offsets").join(source),
            format!("{offset}\n"),
        )
        .expect("rewind offset");
    }

    pub fn committed_offset(&self, source: &str) -> u64 {
        std::fs::read_to_string(self.state_root.join("offsets").join(source))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }
}
