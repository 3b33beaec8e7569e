//! # Message Store Watcher
//!
//! Tails a directory of append-only, line-delimited JSON logs and emits
//! every new record downstream in file-append order, resumable across
//! restarts through the committed offset map.
//!
//! Delivery is at-least-once: offsets advance only after the downstream
//! channel accepted a message, so a crash between emit and commit
//! replays a suffix that the hierarchy deduplicates by message id.
//!
//! A line that fails to parse halts *that file* at *that offset*: the
//! watcher never guesses structure and never skips bytes it has not
//! understood. Every other file keeps flowing. I/O errors retry with
//! exponential backoff (base 100 ms, cap 30 s) forever.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use notify::{Event, EventKind as NotifyEventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::error::{EngineError, Result};
use crate::message::Message;
use crate::offsets::{OffsetStore, source_key};

// ============================================================================
// EVENTS
// ============================================================================

/// What the watcher hands downstream.
#[derive(Debug)]
pub enum WatcherEvent {
    /// A parsed message, with its source and the offset to commit after
    /// the consumer accepts it.
    Message {
        message: Message,
        source: String,
        next_offset: u64,
    },
    /// A new file appeared: a session candidate for the tracker.
    FileCreated { source: String },
}

// ============================================================================
// WATCHER
// ============================================================================

/// The log-directory watcher task.
pub struct LogWatcher {
    watch_dir: PathBuf,
    offsets: OffsetStore,
    config: WatcherConfig,
    /// Files currently halted at a bad line: source -> halt offset.
    halted: HashMap<String, u64>,
    /// Consecutive I/O failures per source, for backoff.
    attempts: HashMap<String, u32>,
}

impl LogWatcher {
    pub fn new(watch_dir: impl Into<PathBuf>, offsets: OffsetStore, config: WatcherConfig) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            offsets,
            config,
            halted: HashMap::new(),
            attempts: HashMap::new(),
        }
    }

    /// Enumerate existing log files in modification-time order.
    pub fn scan_existing(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        if !self.watch_dir.exists() {
            return Ok(Vec::new());
        }
        for item in std::fs::read_dir(&self.watch_dir)? {
            let item = item?;
            if !item.file_type()?.is_file() {
                continue;
            }
            let modified = item
                .metadata()?
                .modified()
                .unwrap_or(std::time::UNIX_EPOCH);
            files.push((modified, item.path()));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files.into_iter().map(|(_, p)| p).collect())
    }

    /// Run the watcher until shutdown flips. Catch-up scan first, then
    /// change-notify subscription with debounced processing.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<WatcherEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        // Catch up on whatever appended while we were down.
        for path in self.scan_existing()? {
            self.process_file(&path, &tx).await?;
        }

        // Bridge notify's callback thread into the async world.
        let (raw_tx, mut raw_rx) = mpsc::channel::<notify::Result<Event>>(512);
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = raw_tx.blocking_send(res);
        })
        .map_err(notify_error)?;
        watcher
            .watch(&self.watch_dir, RecursiveMode::NonRecursive)
            .map_err(notify_error)?;
        info!(dir = %self.watch_dir.display(), "watching message store");

        let debounce = Duration::from_millis(self.config.debounce_ms);
        // Path -> deadline after which it is processed. Coalesces bursts.
        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        let mut created: Vec<PathBuf> = Vec::new();

        loop {
            let next_deadline = pending.values().min().copied();
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("watcher shutting down");
                        return Ok(());
                    }
                }
                event = raw_rx.recv() => {
                    let Some(event) = event else { return Ok(()); };
                    match event {
                        Ok(event) => {
                            let is_create = matches!(event.kind, NotifyEventKind::Create(_));
                            for path in event.paths {
                                if path.is_dir() {
                                    continue;
                                }
                                if is_create {
                                    created.push(path.clone());
                                }
                                pending.insert(path, Instant::now() + debounce);
                            }
                        }
                        Err(e) => warn!(error = %e, "file-system notification error"),
                    }
                }
                _ = sleep_until_or_forever(next_deadline) => {
                    let now = Instant::now();
                    let due: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in due {
                        pending.remove(&path);
                        if let Some(position) = created.iter().position(|p| *p == path) {
                            created.remove(position);
                            if let Some(source) = source_key(&path) {
                                let _ = tx.send(WatcherEvent::FileCreated { source }).await;
                            }
                        }
                        if let Err(e) = self.process_file_with_backoff(&path, &tx, &mut pending).await {
                            warn!(path = %path.display(), error = %e, "watcher stopping on channel loss");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Process a file; on I/O failure schedule a backoff retry instead of
    /// stalling the loop. Only channel loss propagates.
    async fn process_file_with_backoff(
        &mut self,
        path: &Path,
        tx: &mpsc::Sender<WatcherEvent>,
        pending: &mut HashMap<PathBuf, Instant>,
    ) -> Result<()> {
        let Some(source) = source_key(path) else {
            return Ok(());
        };
        match self.process_file(path, tx).await {
            Ok(()) => {
                self.attempts.remove(&source);
                Ok(())
            }
            Err(EngineError::Io(e)) => {
                let attempt = self.attempts.entry(source.clone()).or_insert(0);
                *attempt += 1;
                let backoff = backoff_delay(
                    *attempt,
                    self.config.backoff_base_ms,
                    self.config.backoff_cap_ms,
                );
                warn!(
                    source = %source,
                    attempt = *attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "I/O failure, retrying with backoff"
                );
                pending.insert(path.to_path_buf(), Instant::now() + backoff);
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Read everything after the committed offset, parse line by line,
    /// emit downstream, and commit the offset after each acceptance.
    pub async fn process_file(
        &mut self,
        path: &Path,
        tx: &mpsc::Sender<WatcherEvent>,
    ) -> Result<()> {
        let Some(source) = source_key(path) else {
            return Ok(());
        };
        let committed = self.offsets.get(&source);

        // A halted file stays halted until its committed offset moves
        // (administrative intervention), then we try again.
        if let Some(halt_offset) = self.halted.get(&source) {
            if *halt_offset == committed {
                debug!(source = %source, offset = committed, "file halted at bad line, skipping");
                return Ok(());
            }
            self.halted.remove(&source);
        }

        let lines = match read_complete_lines(path, committed) {
            Ok(lines) => lines,
            Err(e) => return Err(EngineError::Io(e)),
        };
        if lines.is_empty() {
            return Ok(());
        }

        let ingest_at = Utc::now();
        for line in lines {
            if line.text.trim().is_empty() {
                // Blank lines are structural noise, committed past silently.
                self.offsets.commit(&source, line.end)?;
                continue;
            }

            let message = match Message::parse_line(
                &source,
                line.start,
                &line.text,
                ingest_at,
                path,
                (line.start, line.end),
            ) {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "unparseable record, halting file at offset");
                    self.halted.insert(source.clone(), line.start);
                    return Ok(());
                }
            };

            let next_offset = line.end;
            if tx
                .send(WatcherEvent::Message {
                    message,
                    source: source.clone(),
                    next_offset,
                })
                .await
                .is_err()
            {
                // Downstream is gone; the offset stays put so nothing is lost.
                return Err(EngineError::Io(std::io::Error::other(
                    "watcher channel closed",
                )));
            }
            // Commit only after the consumer accepted the message.
            self.offsets.commit(&source, next_offset)?;
        }
        Ok(())
    }

    pub fn offsets(&self) -> &OffsetStore {
        &self.offsets
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn notify_error(e: notify::Error) -> EngineError {
    EngineError::Io(std::io::Error::other(e))
}

fn backoff_delay(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exp = attempt.min(16);
    let delay = base_ms.saturating_mul(1_u64 << exp.saturating_sub(1));
    Duration::from_millis(delay.min(cap_ms))
}

// ============================================================================
// LINE READER
// ============================================================================

/// One complete line with its byte range `[start, end)`, the end sitting
/// past the newline.
#[derive(Debug)]
struct RawLine {
    text: String,
    start: u64,
    end: u64,
}

/// Read complete (newline-terminated) lines from `offset` to EOF. A
/// trailing partial line is left for the next change event.
fn read_complete_lines(path: &Path, offset: u64) -> std::io::Result<Vec<RawLine>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len <= offset {
        return Ok(Vec::new());
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut buffer = Vec::with_capacity((len - offset) as usize);
    file.read_to_end(&mut buffer)?;

    let mut lines = Vec::new();
    let mut start = 0usize;
    for (i, byte) in buffer.iter().enumerate() {
        if *byte == b'\n' {
            let text = String::from_utf8_lossy(&buffer[start..i]).to_string();
            lines.push(RawLine {
                text,
                start: offset + start as u64,
                end: offset + i as u64 + 1,
            });
            start = i + 1;
        }
    }
    Ok(lines)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    fn watcher(dir: &Path) -> LogWatcher {
        let offsets = OffsetStore::open(dir.join("offsets")).unwrap();
        LogWatcher::new(dir.join("watch"), offsets, WatcherConfig::default())
    }

    async fn drain(rx: &mut mpsc::Receiver<WatcherEvent>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WatcherEvent::Message { message, .. } = event {
                out.push(message);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_emits_in_append_order_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("watch")).unwrap();
        let log = dir.path().join("watch").join("a.log");
        write_lines(
            &log,
            &[
                r#"{"role":"user","content":"one"}"#,
                r#"{"role":"assistant","content":"two"}"#,
            ],
        );

        let mut w = watcher(dir.path());
        let (tx, mut rx) = mpsc::channel(16);
        w.process_file(&log, &tx).await.unwrap();

        let messages = drain(&mut rx).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "one");
        assert_eq!(messages[1].content, "two");
        assert!(w.offsets().get("a.log") > 0);
    }

    #[tokio::test]
    async fn test_resumes_from_committed_offset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("watch")).unwrap();
        let log = dir.path().join("watch").join("a.log");
        write_lines(&log, &[r#"{"content":"first"}"#]);

        let mut w = watcher(dir.path());
        let (tx, mut rx) = mpsc::channel(16);
        w.process_file(&log, &tx).await.unwrap();
        assert_eq!(drain(&mut rx).await.len(), 1);

        // Nothing new: reprocessing emits nothing.
        w.process_file(&log, &tx).await.unwrap();
        assert!(drain(&mut rx).await.is_empty());

        write_lines(&log, &[r#"{"content":"second"}"#]);
        w.process_file(&log, &tx).await.unwrap();
        let messages = drain(&mut rx).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "second");
    }

    #[tokio::test]
    async fn test_bad_line_halts_file_without_advancing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("watch")).unwrap();
        let log = dir.path().join("watch").join("a.log");
        write_lines(
            &log,
            &[
                r#"{"content":"good"}"#,
                "{definitely not json",
                r#"{"content":"after the bad one"}"#,
            ],
        );

        let mut w = watcher(dir.path());
        let (tx, mut rx) = mpsc::channel(16);
        w.process_file(&log, &tx).await.unwrap();

        let messages = drain(&mut rx).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "good");

        // Offset parked before the bad line; reprocessing stays halted.
        let offset_after_good = w.offsets().get("a.log");
        w.process_file(&log, &tx).await.unwrap();
        assert!(drain(&mut rx).await.is_empty());
        assert_eq!(w.offsets().get("a.log"), offset_after_good);
    }

    #[tokio::test]
    async fn test_halted_file_does_not_stall_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("watch")).unwrap();
        let bad = dir.path().join("watch").join("bad.log");
        let good = dir.path().join("watch").join("good.log");
        write_lines(&bad, &["not json at all"]);
        write_lines(&good, &[r#"{"content":"flows fine"}"#]);

        let mut w = watcher(dir.path());
        let (tx, mut rx) = mpsc::channel(16);
        w.process_file(&bad, &tx).await.unwrap();
        w.process_file(&good, &tx).await.unwrap();

        let messages = drain(&mut rx).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "flows fine");
    }

    #[tokio::test]
    async fn test_partial_trailing_line_left_for_later() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("watch")).unwrap();
        let log = dir.path().join("watch").join("a.log");
        // No trailing newline on the second record.
        std::fs::write(
            &log,
            "{\"content\":\"complete\"}\n{\"content\":\"part",
        )
        .unwrap();

        let mut w = watcher(dir.path());
        let (tx, mut rx) = mpsc::channel(16);
        w.process_file(&log, &tx).await.unwrap();
        assert_eq!(drain(&mut rx).await.len(), 1);

        // The writer finishes the line.
        let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        write!(file, "ial\"}}\n").unwrap();
        w.process_file(&log, &tx).await.unwrap();
        let messages = drain(&mut rx).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "partial");
    }

    #[test]
    fn test_scan_orders_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("watch");
        std::fs::create_dir_all(&watch).unwrap();
        write_lines(&watch.join("older.log"), &[r#"{"content":"a"}"#]);
        std::thread::sleep(std::time::Duration::from_millis(20));
        write_lines(&watch.join("newer.log"), &[r#"{"content":"b"}"#]);

        let w = watcher(dir.path());
        let files = w.scan_existing().unwrap();
        let names: Vec<String> = files
            .iter()
            .filter_map(|p| source_key(p))
            .collect();
        assert_eq!(names, vec!["older.log", "newer.log"]);
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        assert_eq!(backoff_delay(1, 100, 30_000), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, 100, 30_000), Duration::from_millis(200));
        assert_eq!(backoff_delay(5, 100, 30_000), Duration::from_millis(1600));
        assert_eq!(backoff_delay(12, 100, 30_000), Duration::from_millis(30_000));
    }

    #[test]
    fn test_empty_watch_dir_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("watch")).unwrap();
        let w = watcher(dir.path());
        assert!(w.scan_existing().unwrap().is_empty());
    }
}
