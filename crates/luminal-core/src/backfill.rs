//! History backfill
//!
//! One-shot ingestion of every pre-existing log file, run before the
//! steady-state loop on first start. Reuses the normal pipeline with
//! session separators suppressed, analyzer batches widened, checkpoints
//! deferred to a single final snapshot, and progress logged per N files.
//! Completion is marked by a durable sentinel so later starts skip it.

use tokio::sync::mpsc;
use tracing::info;

use crate::checkpoint::CheckpointTrigger;
use crate::engine::MemoryEngine;
use crate::error::{EngineError, Result};
use crate::message::Message;
use crate::watcher::{LogWatcher, WatcherEvent};

/// Outcome of a backfill run.
#[derive(Debug, Clone, Default)]
pub struct BackfillReport {
    pub files: usize,
    pub messages: usize,
    pub skipped: bool,
}

/// Run the backfill unless the sentinel says it already happened.
pub async fn run_backfill(
    engine: &mut MemoryEngine,
    watcher: &mut LogWatcher,
    batch_size: usize,
    progress_every: usize,
) -> Result<BackfillReport> {
    if engine.state_dir().backfill_complete() {
        info!("backfill sentinel present, skipping history scan");
        return Ok(BackfillReport {
            skipped: true,
            ..BackfillReport::default()
        });
    }

    let files = watcher.scan_existing()?;
    let total = files.len();
    info!(files = total, "backfill starting");
    engine.set_backfill(true);

    let mut report = BackfillReport::default();
    for (index, path) in files.iter().enumerate() {
        let batch = collect_file(watcher, path).await?;
        report.messages += batch.len();
        report.files += 1;

        // Widened batches for throughput; the analyzer scores each chunk
        // in one backend call.
        for chunk in batch.chunks(batch_size.max(1)) {
            engine.ingest_batch(chunk.to_vec())?;
        }

        if progress_every > 0 && (index + 1) % progress_every == 0 {
            info!(
                processed = index + 1,
                total,
                messages = report.messages,
                "backfill progress"
            );
        }
    }

    engine.set_backfill(false);
    engine.project(chrono::Utc::now())?;
    // The single deferred checkpoint for the whole history.
    engine.checkpoint(CheckpointTrigger::Manual)?;
    engine.state_dir().mark_backfill_complete()?;

    info!(
        files = report.files,
        messages = report.messages,
        "backfill complete"
    );
    Ok(report)
}

/// Drain one file through the watcher into an ordered message batch.
async fn collect_file(watcher: &mut LogWatcher, path: &std::path::Path) -> Result<Vec<Message>> {
    let (tx, mut rx) = mpsc::channel::<WatcherEvent>(1024);
    let collector = tokio::spawn(async move {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            if let WatcherEvent::Message { message, .. } = event {
                out.push(message);
            }
        }
        out
    });

    watcher.process_file(path, &tx).await?;
    drop(tx);
    collector
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))
}

// ============================================================================
// TESTS
// ============================================================================
