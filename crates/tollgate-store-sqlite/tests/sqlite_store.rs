// crates/tollgate-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Durable store behavior for counters, ledger, conversations.
// Purpose: Verify atomic primitives against a real database file.
// Dependencies: tollgate-store-sqlite, tempfile
// ============================================================================

//! ## Overview
//! Exercises every store seam against a temporary SQLite file: counter
//! increments and expiry, usage upserts, conditional ledger reservation,
//! alert test-and-set, and the conversation lifecycle.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions."
)]

use time::OffsetDateTime;
use tollgate_core::ConversationState;
use tollgate_core::ConversationStore;
use tollgate_core::CounterKey;
use tollgate_core::CounterScope;
use tollgate_core::CounterStore;
use tollgate_core::DayStamp;
use tollgate_core::LedgerStore;
use tollgate_core::ReserveOutcome;
use tollgate_core::SubjectId;
use tollgate_core::UsageStore;
use tollgate_core::Window;
use tollgate_store_sqlite::SqliteGovernanceStore;
use tollgate_store_sqlite::SqliteStoreConfig;

fn open_store(dir: &tempfile::TempDir) -> SqliteGovernanceStore {
    SqliteGovernanceStore::new(&SqliteStoreConfig {
        path: dir.path().join("tollgate.db"),
        busy_timeout_ms: 5_000,
    })
    .expect("store opens")
}

fn at(secs: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(secs).expect("timestamp")
}

fn day() -> DayStamp {
    DayStamp {
        year: 2026,
        month: 8,
        day: 7,
    }
}

#[test]
fn counter_increment_is_post_increment_and_expires() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let now = at(1_700_000_000);
    let key = CounterKey::at(CounterScope::Address, "203.0.113.1", Window::Minute, now);
    assert_eq!(store.increment(&key, now).expect("sample").count, 1);
    assert_eq!(store.increment(&key, now).expect("sample").count, 2);
    let sample = store.increment(&key, now).expect("sample");
    assert_eq!(sample.count, 3);
    assert!(sample.ttl_secs <= 60);

    // A later window uses a fresh key; the expired row is pruned.
    let later = at(1_700_000_000 + 3_600);
    let next = CounterKey::at(CounterScope::Address, "203.0.113.1", Window::Minute, later);
    assert_eq!(store.increment(&next, later).expect("sample").count, 1);
}

#[test]
fn usage_upsert_accumulates_tokens_and_requests() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let subject = SubjectId::new("alice");
    store.add_usage(&subject, day(), 1_000).expect("add");
    store.add_usage(&subject, day(), 2_500).expect("add");
    let usage = store.usage(&subject, day()).expect("usage");
    assert_eq!(usage.tokens_used, 3_500);
    assert_eq!(usage.request_count, 2);

    // Unknown rows read as zero.
    let other = store.usage(&SubjectId::new("bob"), day()).expect("usage");
    assert_eq!(other.tokens_used, 0);
    assert_eq!(other.request_count, 0);
}

#[test]
fn ledger_reserve_is_conditional_and_never_rolls_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    match store.reserve(day(), 700, 1_000).expect("reserve") {
        ReserveOutcome::Reserved {
            total_after,
        } => assert_eq!(total_after, 700),
        ReserveOutcome::Exhausted {
            ..
        } => panic!("must reserve"),
    }
    match store.reserve(day(), 400, 1_000).expect("reserve") {
        ReserveOutcome::Exhausted {
            total,
        } => assert_eq!(total, 700),
        ReserveOutcome::Reserved {
            ..
        } => panic!("must exhaust"),
    }
    // Commits stack actuals on top of the standing reservation.
    let entry = store.commit(day(), 50, 900, Some(&SubjectId::new("alice"))).expect("commit");
    assert_eq!(entry.total_spend_minor, 750);
    assert_eq!(entry.request_count, 1);
    assert_eq!(entry.token_count, 900);
    assert_eq!(entry.unique_subject_count, 1);
}

#[test]
fn alert_marks_fire_exactly_once_per_day() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    assert!(store.mark_alerted(day(), 50).expect("mark"));
    assert!(!store.mark_alerted(day(), 50).expect("mark"));
    assert!(store.mark_alerted(day(), 75).expect("mark"));
    let tomorrow = DayStamp {
        year: 2026,
        month: 8,
        day: 8,
    };
    assert!(store.mark_alerted(tomorrow, 50).expect("mark"));
}

#[test]
fn conversation_lifecycle_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let record = store.create("sub:alice", None, 1_700_000_000_000).expect("create");
    assert_eq!(record.state, ConversationState::Active);

    let record = store.append_turn(&record.id, "q1", "a1", 80, 100).expect("turn");
    assert_eq!(record.total_tokens, 80);
    assert_eq!(record.state, ConversationState::Active);
    let record = store.append_turn(&record.id, "q2", "a2", 40, 100).expect("turn");
    assert_eq!(record.total_tokens, 120);
    assert_eq!(record.state, ConversationState::LimitReached);

    let transcript = store.transcript(&record.id).expect("transcript");
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].seq, 1);
    assert_eq!(transcript[1].seq, 2);
    assert_eq!(transcript[1].user_text, "q2");

    store.archive(&record.id).expect("archive");
    let loaded = store.load(&record.id).expect("load").expect("record");
    assert_eq!(loaded.state, ConversationState::Archived);
    assert_eq!(loaded.total_tokens, 120);
    assert!(store.append_turn(&record.id, "q3", "a3", 1, 100).is_err());
}

#[test]
fn successor_records_carry_their_summary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let successor = store
        .create("sub:alice", Some("summary of prior thread".to_string()), 0)
        .expect("create");
    let loaded = store.load(&successor.id).expect("load").expect("record");
    assert_eq!(loaded.summary_context.as_deref(), Some("summary of prior thread"));
    assert_eq!(loaded.total_tokens, 0);
}

#[test]
fn unknown_identifiers_read_as_absent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir);
    let bogus = tollgate_core::ConversationId::new("c999");
    assert!(store.load(&bogus).expect("load").is_none());
    assert!(store.archive(&bogus).is_err());
    let malformed = tollgate_core::ConversationId::new("not-an-id");
    assert!(store.load(&malformed).expect("load").is_none());
}
