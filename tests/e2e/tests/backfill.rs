//! One-shot history backfill over pre-existing logs.

use luminal_core::{MemoryScale, run_backfill};
use luminal_e2e_tests::harness::TestEnv;
use luminal_e2e_tests::mocks::user_line;

/// A hundred pre-existing files seed the hierarchy in one pass: one
/// final checkpoint, a sentinel, and no separators.
#[tokio::test]
async fn backfill_seeds_history_once() {
    let env = TestEnv::new();
    for f in 0..100 {
        let lines: Vec<String> = (0..10)
            .map(|l| user_line(&format!("archived chat {f} line {l}")))
            .collect();
        env.append_log(&format!("session-{f:03}.log"), &lines);
    }

    let mut engine = env.engine();
    let mut watcher = env.watcher();
    let report = run_backfill(&mut engine, &mut watcher, 128, 25)
        .await
        .expect("backfill");

    assert_eq!(report.files, 100);
    assert_eq!(report.messages, 1000);
    assert_eq!(engine.messages_admitted(), 1000);

    // Separators were suppressed across all 100 session switches.
    let separators = engine
        .hierarchy()
        .scale(MemoryScale::Immediate)
        .entries()
        .iter()
        .filter(|e| e.content.contains("session boundary"))
        .count();
    assert_eq!(separators, 0);

    // Exactly one deferred checkpoint, and the sentinel is down.
    assert_eq!(engine.checkpoints().index().len(), 1);
    assert!(env.state_root.join("backfill_complete").exists());

    // Qualifying landmarks (the first-session/first-day milestone) made
    // it into Lifetime.
    assert!(
        !engine
            .hierarchy()
            .scale(MemoryScale::Lifetime)
            .is_empty()
    );
}

/// A later startup sees the sentinel and skips the scan entirely.
#[tokio::test]
async fn subsequent_startup_skips_backfill() {
    let env = TestEnv::new();
    env.append_log("old.log", &[user_line("ancient history")]);

    {
        let mut engine = env.engine();
        let mut watcher = env.watcher();
        run_backfill(&mut engine, &mut watcher, 64, 10)
            .await
            .expect("first backfill");
    }

    let mut engine = env.engine();
    let mut watcher = env.watcher();
    let report = run_backfill(&mut engine, &mut watcher, 64, 10)
        .await
        .expect("second backfill");
    assert!(report.skipped);
    assert_eq!(report.files, 0);

    // The offsets survive, so steady-state watching resumes past the
    // backfilled content.
    assert!(env.committed_offset("old.log") > 0);
}
