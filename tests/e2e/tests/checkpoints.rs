//! Checkpoint triggers, rotation and restore.

use chrono::Utc;
use luminal_core::{CheckpointTrigger, Config, MemoryScale};
use luminal_e2e_tests::harness::TestEnv;
use luminal_e2e_tests::mocks::user_line;

/// Sixty quiet messages produce exactly one MessageCount checkpoint (at
/// message fifty) and nothing else.
#[tokio::test]
async fn message_interval_fires_exactly_once() {
    let env = TestEnv::new();
    let lines: Vec<String> = (0..60)
        .map(|i| user_line(&format!("routine note {i}")))
        .collect();
    env.append_log("A.log", &lines);

    let mut engine = env.engine();
    let mut watcher = env.watcher();
    let messages = env.drain_log(&mut watcher, "A.log").await;

    for message in messages {
        engine.ingest(message).expect("ingest");
        engine.poll_checkpoint(Utc::now()).expect("poll");
    }

    let index = engine.checkpoints().index();
    assert_eq!(index.len(), 1, "one checkpoint at message fifty");
    assert_eq!(index[0].trigger, CheckpointTrigger::MessageCount);
}

/// Rotation never orphans the latest pointer, and retired snapshots
/// become compressed archives.
#[test]
fn rotation_keeps_latest_sound() {
    let mut config = Config::default();
    config.checkpoint.max_retained = 3;
    let env = TestEnv::with_config(config);
    let mut engine = env.engine();

    for i in 0..8 {
        engine
            .ingest(
                luminal_core::Message::parse_line(
                    "A.log",
                    i,
                    &user_line(&format!("note {i}")),
                    Utc::now(),
                    std::path::Path::new("A.log"),
                    (i, i + 1),
                )
                .unwrap(),
            )
            .expect("ingest");
        engine.checkpoint(CheckpointTrigger::Manual).expect("checkpoint");
    }

    assert_eq!(engine.checkpoints().index().len(), 3);
    assert!(engine.checkpoints().latest_is_sound());

    let archive_dir = env.state_root.join("checkpoints").join("archive");
    let archives = std::fs::read_dir(archive_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".json.zst"))
        .count();
    assert_eq!(archives, 5);
}

/// Dump then restore reproduces relationship and scale contents.
#[test]
fn checkpoint_round_trip_reproduces_state() {
    let env = TestEnv::new();
    let (relationship, total, lifetime);
    {
        let mut engine = env.engine();
        for (i, text) in [
            "we finally shipped it, so proud",
            "that was wonderful work",
            "I am worried about the deadline",
        ]
        .iter()
        .enumerate()
        {
            engine
                .ingest(
                    luminal_core::Message::parse_line(
                        "A.log",
                        i as u64,
                        &user_line(text),
                        Utc::now(),
                        std::path::Path::new("A.log"),
                        (i as u64, i as u64 + 1),
                    )
                    .unwrap(),
                )
                .expect("ingest");
        }
        engine.checkpoint(CheckpointTrigger::Manual).expect("checkpoint");
        relationship = *engine.relationship();
        total = engine.hierarchy().scale(MemoryScale::Immediate).len();
        lifetime = engine.hierarchy().scale(MemoryScale::Lifetime).len();
    }

    let engine = env.engine();
    assert_eq!(*engine.relationship(), relationship);
    assert_eq!(engine.hierarchy().scale(MemoryScale::Immediate).len(), total);
    assert_eq!(engine.hierarchy().scale(MemoryScale::Lifetime).len(), lifetime);
}

/// The restore CLI path: an older checkpoint can be promoted back to
/// the restore point.
#[test]
fn specific_checkpoint_promotable() {
    let env = TestEnv::new();
    let early_id;
    {
        let mut engine = env.engine();
        engine
            .ingest(
                luminal_core::Message::parse_line(
                    "A.log",
                    0,
                    &user_line("early state"),
                    Utc::now(),
                    std::path::Path::new("A.log"),
                    (0, 1),
                )
                .unwrap(),
            )
            .expect("ingest");
        early_id = engine.checkpoint(CheckpointTrigger::Manual).expect("early");
        engine
            .ingest(
                luminal_core::Message::parse_line(
                    "A.log",
                    1,
                    &user_line("later state"),
                    Utc::now(),
                    std::path::Path::new("A.log"),
                    (1, 2),
                )
                .unwrap(),
            )
            .expect("ingest");
        engine.checkpoint(CheckpointTrigger::Manual).expect("late");
    }

    // Promote the early snapshot the way `luminal restore` does.
    {
        let state = luminal_core::StateDir::open(&env.state_root).unwrap();
        let mut manager = luminal_core::CheckpointManager::open(
            Config::default().checkpoint,
            state.checkpoints_dir(),
        )
        .unwrap();
        let mut restored = manager.restore_by_id(&early_id).unwrap();
        restored.created_at = Utc::now();
        restored.trigger = CheckpointTrigger::Manual;
        manager.write(&restored).unwrap();
    }

    let engine = env.engine();
    assert_eq!(
        engine.hierarchy().scale(MemoryScale::Immediate).len(),
        1,
        "engine restored the promoted early state"
    );
}
