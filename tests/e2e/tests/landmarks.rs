//! Landmark detection and lifetime permanence.

use chrono::Utc;
use luminal_core::{CheckpointTrigger, EntryKind, MemoryScale, Message};
use luminal_e2e_tests::harness::TestEnv;
use luminal_e2e_tests::mocks::{FixedAffectBackend, user_line};

fn message(session: &str, text: &str, seq: u64) -> Message {
    Message::parse_line(
        session,
        seq,
        &user_line(text),
        Utc::now(),
        std::path::Path::new(session),
        (seq, seq + 1),
    )
    .unwrap()
}

/// An accomplishment at forced 0.9 intensity lands in Lifetime and in
/// the briefing's accomplishment section.
#[test]
fn forced_accomplishment_reaches_lifetime_and_briefing() {
    let env = TestEnv::new();
    let mut engine =
        env.engine_with_backend(Box::new(FixedAffectBackend::with_intensity(0.9, "pride")));

    let report = engine
        .ingest(message("A.log", "we finally fixed the pipeline", 0))
        .expect("ingest");

    assert!(report.landmarks.contains(&EntryKind::Accomplishment));
    // 0.9 also clears the emotional-peak threshold.
    assert!(report.landmarks.contains(&EntryKind::EmotionalPeak));

    let lifetime = engine.hierarchy().scale(MemoryScale::Lifetime);
    assert_eq!(lifetime.bucket(EntryKind::Accomplishment).len(), 1);
    assert_eq!(lifetime.bucket(EntryKind::EmotionalPeak).len(), 1);

    let briefing = env.briefing();
    let accomplishment_section = briefing
        .split("### accomplishment")
        .nth(1)
        .expect("accomplishment section");
    assert!(accomplishment_section.contains("we finally fixed the pipeline"));

    // 0.9 >= the 0.85 emotion threshold: the ingest checkpointed itself.
    assert_eq!(report.checkpoint, Some(CheckpointTrigger::EmotionalPeak));
}

/// Regret markers land Regret entries regardless of valence.
#[test]
fn regret_marker_detected() {
    let env = TestEnv::new();
    let mut engine = env.engine();
    let report = engine
        .ingest(message("A.log", "I regret deleting the archive yesterday", 0))
        .expect("ingest");
    assert!(report.landmarks.contains(&EntryKind::Regret));
    assert_eq!(
        engine
            .hierarchy()
            .scale(MemoryScale::Lifetime)
            .bucket(EntryKind::Regret)
            .len(),
        1
    );
}

/// Lifetime only grows: consolidation and pruning never remove entries.
#[test]
fn lifetime_is_append_only() {
    let env = TestEnv::new();
    let mut engine =
        env.engine_with_backend(Box::new(FixedAffectBackend::with_intensity(0.95, "joy")));

    for i in 0..10 {
        engine
            .ingest(message("A.log", &format!("peak moment number {i}"), i))
            .expect("ingest");
    }
    let before = engine.hierarchy().scale(MemoryScale::Lifetime).len();
    assert!(before >= 10);

    for _ in 0..5 {
        engine.consolidate(Utc::now()).expect("consolidate");
    }
    assert!(engine.hierarchy().scale(MemoryScale::Lifetime).len() >= before);
}

/// Milestone phrases fire on first occurrence only; the briefing's
/// conversation seeds recall them.
#[test]
fn milestone_phrase_seeds_conversation() {
    let env = TestEnv::new();
    let mut engine = env.engine();
    engine
        .ingest(message(
            "A.log",
            "that was the first time the whole pipeline ran clean",
            0,
        ))
        .expect("ingest");

    let briefing = env.briefing();
    assert!(briefing.contains("A first worth revisiting:"));
}
