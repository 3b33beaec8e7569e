//! Orchestrator
//!
//! The event loop: one watcher task feeding a bounded command channel,
//! one memory task owning every mutable structure, and three timers
//! (consolidation, checkpoint poll, health). Back-pressure is the
//! watcher blocking on enqueue. Shutdown drains the queue, writes a
//! Shutdown-trigger checkpoint and flushes the projector before exit.

use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, MissedTickBehavior, interval_at, Instant};
use tracing::{error, info, warn};

use luminal_core::{
    AffectAnalyzer, AnalyzerBackendKind, CheckpointTrigger, Config, LogWatcher, MemoryEngine,
    OffsetStore, Result, StateDir, WatcherEvent, run_backfill,
};

// ============================================================================
// ANALYZER SELECTION
// ============================================================================

/// Build the configured analyzer. Model backends are deployment plugins;
/// a build without one linked degrades to the rules scorer so the
/// pipeline always makes forward progress.
pub fn build_analyzer(config: &Config) -> AffectAnalyzer {
    match config.analyzer.backend {
        AnalyzerBackendKind::Rules => AffectAnalyzer::rules(),
        other => {
            warn!(
                backend = ?other,
                "no model backend linked in this build, scoring with rules"
            );
            AffectAnalyzer::rules()
        }
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Foreground run: lock, restore, backfill, then the steady-state loop.
pub async fn run(config: Config, state_root: PathBuf, watch_dir: PathBuf) -> Result<()> {
    let mut state = StateDir::open(&state_root)?;
    state.lock()?;
    info!(
        state = %state_root.display(),
        watch = %watch_dir.display(),
        "luminal starting"
    );

    let offsets = OffsetStore::open(state.offsets_dir())?;
    let analyzer = build_analyzer(&config);
    let mut engine = MemoryEngine::open(config.clone(), state, analyzer)?;
    let mut watcher = LogWatcher::new(&watch_dir, offsets, config.watcher.clone());

    // One-shot history scan before the steady state begins.
    run_backfill(
        &mut engine,
        &mut watcher,
        config.analyzer.backfill_batch_size,
        config.orchestrator.backfill_progress_every,
    )
    .await?;

    let (tx, mut rx) = mpsc::channel::<WatcherEvent>(config.orchestrator.channel_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher_task = tokio::spawn(watcher.run(tx, shutdown_rx));

    let mut consolidation = timer(config.orchestrator.consolidation_interval_seconds);
    let mut checkpoint_poll = timer(config.orchestrator.checkpoint_poll_seconds);
    let mut health = timer(config.orchestrator.health_interval_seconds);
    let batch_size = config.analyzer.batch_size;

    let loop_result: Result<()> = 'main: loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "signal handler failed, shutting down anyway");
                }
                info!("shutdown signal received");
                break 'main Ok(());
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    warn!("watcher channel closed");
                    break 'main Ok(());
                };
                if let Err(e) = handle_event(&mut engine, &mut rx, event, batch_size) {
                    if e.is_recoverable() {
                        warn!(error = %e, "recovered from ingest error");
                    } else {
                        break 'main Err(e);
                    }
                }
            }
            _ = consolidation.tick() => {
                if let Err(e) = engine.consolidate(Utc::now()) {
                    if e.is_recoverable() {
                        warn!(error = %e, "consolidation error, continuing");
                    } else {
                        break 'main Err(e);
                    }
                }
            }
            _ = checkpoint_poll.tick() => {
                if let Err(e) = engine.poll_checkpoint(Utc::now()) {
                    // Checkpoint errors already mean every target failed.
                    break 'main Err(e);
                }
            }
            _ = health.tick() => {
                let snapshot = engine.health();
                info!(
                    messages = snapshot.messages_admitted,
                    immediate = snapshot.entries_immediate,
                    short_term = snapshot.entries_short_term,
                    long_term = snapshot.entries_long_term,
                    lifetime = snapshot.entries_lifetime,
                    checkpoints = snapshot.checkpoints_retained,
                    session = snapshot.active_session.as_deref().unwrap_or("-"),
                    "health"
                );
            }
        }
    };

    // Stop the watcher, drain whatever it already enqueued, then flush.
    let _ = shutdown_tx.send(true);
    drain_remaining(&mut engine, &mut rx);

    match &loop_result {
        Ok(()) => {
            engine.shutdown()?;
        }
        Err(e) => {
            error!(error = %e, "fatal error, attempting final checkpoint");
            if let Err(inner) = engine.checkpoint(CheckpointTrigger::Error) {
                error!(error = %inner, "final error checkpoint also failed");
            }
        }
    }

    watcher_task.abort();
    let _ = watcher_task.await;
    loop_result
}

/// Ingest one event plus whatever else is already queued, as one batch.
fn handle_event(
    engine: &mut MemoryEngine,
    rx: &mut mpsc::Receiver<WatcherEvent>,
    event: WatcherEvent,
    batch_size: usize,
) -> Result<()> {
    let mut batch = Vec::with_capacity(batch_size);
    collect_event(event, &mut batch);
    while batch.len() < batch_size {
        match rx.try_recv() {
            Ok(event) => collect_event(event, &mut batch),
            Err(_) => break,
        }
    }
    if !batch.is_empty() {
        engine.ingest_batch(batch)?;
    }
    Ok(())
}

fn collect_event(event: WatcherEvent, batch: &mut Vec<luminal_core::Message>) {
    match event {
        WatcherEvent::Message { message, .. } => batch.push(message),
        WatcherEvent::FileCreated { source } => {
            // A session candidate; the tracker switches when a message
            // actually arrives from it.
            info!(source = %source, "new log file appeared");
        }
    }
}

fn drain_remaining(engine: &mut MemoryEngine, rx: &mut mpsc::Receiver<WatcherEvent>) {
    let mut batch = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let WatcherEvent::Message { message, .. } = event {
            batch.push(message);
        }
    }
    if !batch.is_empty() {
        info!(pending = batch.len(), "draining queued messages before shutdown");
        if let Err(e) = engine.ingest_batch(batch) {
            warn!(error = %e, "drain failed, queued tail lost to the next run");
        }
    }
}

/// Interval that waits a full period before its first tick and never
/// bursts to catch up.
fn timer(period_seconds: u64) -> tokio::time::Interval {
    let period = Duration::from_secs(period_seconds.max(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

// ============================================================================
// TESTS
// ============================================================================
