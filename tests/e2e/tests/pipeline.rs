//! Pipeline journeys: ingestion, sessions, crash recovery.

use luminal_core::{CheckpointTrigger, EntryKind, MemoryScale, Speaker};
use luminal_e2e_tests::harness::TestEnv;
use luminal_e2e_tests::mocks::{assistant_line, user_line};

/// Three messages flow from a log file into Immediate; speaker
/// decomposition is populated and connection strictly rises.
#[tokio::test]
async fn warm_exchange_lands_in_immediate() {
    let env = TestEnv::new();
    env.append_log(
        "A.log",
        &[
            user_line("hello"),
            assistant_line("hi"),
            user_line("I love this"),
        ],
    );

    let mut engine = env.engine();
    let start_connection = engine.relationship().connection;
    let mut watcher = env.watcher();
    let messages = env.drain_log(&mut watcher, "A.log").await;
    assert_eq!(messages.len(), 3);

    engine.ingest_batch(messages).expect("ingest");

    let immediate = engine.hierarchy().scale(MemoryScale::Immediate);
    assert_eq!(immediate.len(), 3);

    // The last entry carries a per-speaker decomposition of the dialogue.
    let last = immediate.entries().last().unwrap();
    let affect = last.affect.as_ref().expect("affect attached");
    assert!(affect.per_speaker.contains_key(Speaker::User.as_str()));
    assert!(affect.per_speaker.contains_key(Speaker::Assistant.as_str()));

    assert!(
        engine.relationship().connection > start_connection,
        "a warm exchange must strictly raise connection"
    );
}

/// A second log file triggers a separator and switches the active
/// session; the briefing's immediate context follows the new session.
#[tokio::test]
async fn new_file_switches_session_with_separator() {
    let env = TestEnv::new();
    env.append_log("A.log", &[user_line("working in session A")]);
    env.append_log("B.log", &[user_line("now in session B")]);

    let mut engine = env.engine();
    let mut watcher = env.watcher();
    let a = env.drain_log(&mut watcher, "A.log").await;
    let b = env.drain_log(&mut watcher, "B.log").await;
    engine.ingest_batch(a).expect("ingest A");
    engine.ingest_batch(b).expect("ingest B");

    assert_eq!(engine.session().active_session(), Some("B.log"));

    // One separator between the two sessions: 2 messages + 1 marker.
    let immediate = engine.hierarchy().scale(MemoryScale::Immediate);
    assert_eq!(immediate.len(), 3);
    let separator_count = immediate
        .entries()
        .iter()
        .filter(|e| e.content.contains("session boundary"))
        .count();
    assert_eq!(separator_count, 1);

    let briefing = env.briefing();
    assert!(briefing.contains("now in session B"));
    let context = env.realtime("conversation_context.json");
    assert_eq!(context["active_session"], "B.log");
}

/// Crash between emit and offset-advance replays a suffix; dedup keeps
/// the Immediate multiset equal to the distinct records.
#[tokio::test]
async fn replay_after_crash_dedups() {
    let env = TestEnv::new();
    env.append_log(
        "A.log",
        &[
            user_line("hello"),
            assistant_line("hi"),
            user_line("I love this"),
        ],
    );

    // First life: process everything, checkpoint, then "crash" with the
    // offset rewound to just after message one.
    let offset_after_all;
    {
        let mut engine = env.engine();
        let mut watcher = env.watcher();
        let messages = env.drain_log(&mut watcher, "A.log").await;
        let first_line_end = (user_line("hello").len() + 1) as u64;
        engine.ingest_batch(messages).expect("ingest");
        engine
            .checkpoint(CheckpointTrigger::Manual)
            .expect("checkpoint");
        offset_after_all = env.committed_offset("A.log");
        env.rewind_offset("A.log", first_line_end);
    }

    // Second life: restore and replay messages two and three.
    let mut engine = env.engine();
    let mut watcher = env.watcher();
    let replayed = env.drain_log(&mut watcher, "A.log").await;
    assert_eq!(replayed.len(), 2, "offset rewind replays the suffix");
    engine.ingest_batch(replayed).expect("ingest replay");

    // Exactly three entries: duplicates were recognized by message id.
    assert_eq!(engine.hierarchy().scale(MemoryScale::Immediate).len(), 3);
    assert_eq!(env.committed_offset("A.log"), offset_after_all);
}

/// A message admitted (and its offset committed) after the last
/// checkpoint survives a crash: the watcher won't redeliver it, so the
/// scale-log tail must bring it back on restore.
#[tokio::test]
async fn checkpoint_lag_crash_loses_nothing() {
    let env = TestEnv::new();
    env.append_log("A.log", &[user_line("hello"), assistant_line("hi")]);

    {
        let mut engine = env.engine();
        let mut watcher = env.watcher();
        let batch = env.drain_log(&mut watcher, "A.log").await;
        engine.ingest_batch(batch).expect("ingest");
        engine
            .checkpoint(CheckpointTrigger::Manual)
            .expect("checkpoint");

        // One more admission past the checkpoint; its offset commits,
        // no further checkpoint fires, then the process dies.
        env.append_log("A.log", &[user_line("I regret missing the backup window")]);
        let tail = env.drain_log(&mut watcher, "A.log").await;
        assert_eq!(tail.len(), 1);
        engine.ingest_batch(tail).expect("ingest tail");
        assert_eq!(engine.checkpoints().index().len(), 1);
    }

    let mut engine = env.engine();
    // All three messages are back, including the unsnapshotted one.
    assert_eq!(engine.hierarchy().scale(MemoryScale::Immediate).len(), 3);
    assert_eq!(engine.messages_admitted(), 3);
    // Its landmark copy came back through the lifetime log too.
    assert_eq!(
        engine
            .hierarchy()
            .scale(MemoryScale::Lifetime)
            .bucket(EntryKind::Regret)
            .len(),
        1
    );

    // The watcher has nothing to redeliver (offsets already advanced)...
    let mut watcher = env.watcher();
    let replayed = env.drain_log(&mut watcher, "A.log").await;
    assert!(replayed.is_empty());
    // ...and even a forced duplicate is refused by the replayed dedup set.
    let duplicate = luminal_core::Message::parse_line(
        "A.log",
        0,
        &user_line("I regret missing the backup window"),
        chrono::Utc::now(),
        std::path::Path::new("A.log"),
        (0, 1),
    )
    .unwrap();
    let report = engine.ingest(duplicate).expect("duplicate ingest");
    assert!(!report.admitted);
}

/// An unparseable line freezes its file at that offset while other
/// files keep flowing.
#[tokio::test]
async fn malformed_line_freezes_only_its_file() {
    let env = TestEnv::new();
    env.append_log(
        "bad.log",
        &[
            user_line("before the damage"),
            "{broken json!!".to_string(),
            user_line("after the damage"),
        ],
    );
    env.append_log("good.log", &[user_line("unaffected")]);

    let mut engine = env.engine();
    let mut watcher = env.watcher();
    let bad = env.drain_log(&mut watcher, "bad.log").await;
    let good = env.drain_log(&mut watcher, "good.log").await;

    assert_eq!(bad.len(), 1);
    assert_eq!(good.len(), 1);
    engine.ingest_batch(bad).expect("ingest bad");
    engine.ingest_batch(good).expect("ingest good");

    // The bad file's offset stopped before the broken line.
    let stopped_at = env.committed_offset("bad.log");
    assert_eq!(stopped_at, (user_line("before the damage").len() + 1) as u64);
}
