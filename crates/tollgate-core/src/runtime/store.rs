// crates/tollgate-core/src/runtime/store.rs
// ============================================================================
// Module: Tollgate In-Memory Stores
// Description: Mutex-map implementations of the governance store seams.
// Purpose: Provide deterministic store implementations without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! In-memory implementations of [`UsageStore`], [`LedgerStore`], and
//! [`ConversationStore`] for tests, demos, and single-process deployments.
//! Each operation holds one mutex for its whole read-modify-write, which
//! satisfies the atomicity contract within a process; multi-instance
//! deployments use the durable stores instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::conversation::ConversationRecord;
use crate::core::conversation::ConversationState;
use crate::core::conversation::TurnRecord;
use crate::core::identity::ConversationId;
use crate::core::identity::SubjectId;
use crate::core::time::DayStamp;
use crate::interfaces::BudgetLedgerEntry;
use crate::interfaces::ConversationStore;
use crate::interfaces::ConversationStoreError;
use crate::interfaces::DailyTokenUsage;
use crate::interfaces::LedgerStore;
use crate::interfaces::LedgerStoreError;
use crate::interfaces::ReserveOutcome;
use crate::interfaces::UsageStore;
use crate::interfaces::UsageStoreError;

// ============================================================================
// SECTION: Usage Store
// ============================================================================

/// One `(subject, day)` usage row.
#[derive(Debug, Clone, Copy, Default)]
struct UsageRow {
    /// Tokens consumed so far.
    tokens: u64,
    /// Requests committed so far.
    requests: u64,
}

/// In-memory per-subject daily usage store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryUsageStore {
    /// Usage rows keyed by `(subject, day-key)`.
    rows: Arc<Mutex<BTreeMap<(String, String), UsageRow>>>,
}

impl InMemoryUsageStore {
    /// Creates an empty usage store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageStore for InMemoryUsageStore {
    fn usage(
        &self,
        subject: &SubjectId,
        day: DayStamp,
    ) -> Result<DailyTokenUsage, UsageStoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| UsageStoreError::Storage("usage store mutex poisoned".to_string()))?;
        let row = rows
            .get(&(subject.as_str().to_string(), day.key()))
            .copied()
            .unwrap_or_default();
        Ok(DailyTokenUsage {
            subject: subject.clone(),
            day,
            tokens_used: row.tokens,
            request_count: row.requests,
        })
    }

    fn add_usage(
        &self,
        subject: &SubjectId,
        day: DayStamp,
        tokens: u64,
    ) -> Result<(), UsageStoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| UsageStoreError::Storage("usage store mutex poisoned".to_string()))?;
        let row = rows.entry((subject.as_str().to_string(), day.key())).or_default();
        row.tokens = row.tokens.saturating_add(tokens);
        row.requests = row.requests.saturating_add(1);
        Ok(())
    }
}

// ============================================================================
// SECTION: Ledger Store
// ============================================================================

/// One daily ledger row plus its alert and subject sets.
#[derive(Debug, Clone, Default)]
struct LedgerRow {
    /// Spend to date, including speculative reservations.
    total_spend_minor: u64,
    /// Committed request count.
    request_count: u64,
    /// Committed token count.
    token_count: u64,
    /// Distinct subjects that committed usage.
    subjects: BTreeSet<String>,
    /// Threshold percentages already alerted.
    alerted: BTreeSet<u8>,
}

/// In-memory global spend ledger store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedgerStore {
    /// Ledger rows keyed by day key.
    rows: Arc<Mutex<BTreeMap<String, LedgerRow>>>,
}

impl InMemoryLedgerStore {
    /// Creates an empty ledger store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn reserve(
        &self,
        day: DayStamp,
        estimate_minor: u64,
        cap_minor: u64,
    ) -> Result<ReserveOutcome, LedgerStoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| LedgerStoreError::Storage("ledger store mutex poisoned".to_string()))?;
        let row = rows.entry(day.key()).or_default();
        let proposed = row.total_spend_minor.saturating_add(estimate_minor);
        if proposed > cap_minor {
            return Ok(ReserveOutcome::Exhausted {
                total: row.total_spend_minor,
            });
        }
        row.total_spend_minor = proposed;
        Ok(ReserveOutcome::Reserved {
            total_after: proposed,
        })
    }

    fn commit(
        &self,
        day: DayStamp,
        actual_minor: u64,
        tokens: u64,
        subject: Option<&SubjectId>,
    ) -> Result<BudgetLedgerEntry, LedgerStoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| LedgerStoreError::Storage("ledger store mutex poisoned".to_string()))?;
        let row = rows.entry(day.key()).or_default();
        row.total_spend_minor = row.total_spend_minor.saturating_add(actual_minor);
        row.request_count = row.request_count.saturating_add(1);
        row.token_count = row.token_count.saturating_add(tokens);
        if let Some(subject) = subject {
            row.subjects.insert(subject.as_str().to_string());
        }
        Ok(BudgetLedgerEntry {
            day,
            total_spend_minor: row.total_spend_minor,
            request_count: row.request_count,
            token_count: row.token_count,
            unique_subject_count: row.subjects.len() as u64,
        })
    }

    fn entry(&self, day: DayStamp) -> Result<BudgetLedgerEntry, LedgerStoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| LedgerStoreError::Storage("ledger store mutex poisoned".to_string()))?;
        Ok(rows.get(&day.key()).map_or_else(
            || BudgetLedgerEntry::zero(day),
            |row| BudgetLedgerEntry {
                day,
                total_spend_minor: row.total_spend_minor,
                request_count: row.request_count,
                token_count: row.token_count,
                unique_subject_count: row.subjects.len() as u64,
            },
        ))
    }

    fn mark_alerted(&self, day: DayStamp, threshold_pct: u8) -> Result<bool, LedgerStoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| LedgerStoreError::Storage("ledger store mutex poisoned".to_string()))?;
        let row = rows.entry(day.key()).or_default();
        Ok(row.alerted.insert(threshold_pct))
    }
}

// ============================================================================
// SECTION: Conversation Store
// ============================================================================

/// Mutable conversation table state.
#[derive(Debug, Default)]
struct ConversationTable {
    /// Next identifier suffix.
    next_id: u64,
    /// Conversation records keyed by identifier string.
    records: BTreeMap<String, ConversationRecord>,
    /// Turn lists keyed by conversation identifier string.
    turns: BTreeMap<String, Vec<TurnRecord>>,
}

/// In-memory conversation and turn store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryConversationStore {
    /// Table state behind one mutex.
    table: Arc<Mutex<ConversationTable>>,
}

impl InMemoryConversationStore {
    /// Creates an empty conversation store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the table, mapping poisoning to a storage error.
    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, ConversationTable>, ConversationStoreError> {
        self.table
            .lock()
            .map_err(|_| ConversationStoreError::Storage("conversation store mutex poisoned".to_string()))
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn create(
        &self,
        owner: &str,
        summary_context: Option<String>,
        created_at_ms: i64,
    ) -> Result<ConversationRecord, ConversationStoreError> {
        let mut table = self.lock()?;
        table.next_id = table.next_id.saturating_add(1);
        let id = ConversationId::new(format!("c{}", table.next_id));
        let record = ConversationRecord {
            id: id.clone(),
            owner: owner.to_string(),
            total_tokens: 0,
            state: ConversationState::Active,
            summary_context,
            created_at_ms,
        };
        table.records.insert(id.as_str().to_string(), record.clone());
        table.turns.insert(id.as_str().to_string(), Vec::new());
        Ok(record)
    }

    fn load(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationRecord>, ConversationStoreError> {
        let table = self.lock()?;
        Ok(table.records.get(id.as_str()).cloned())
    }

    fn append_turn(
        &self,
        id: &ConversationId,
        user_text: &str,
        assistant_text: &str,
        tokens: u64,
        ceiling: u64,
    ) -> Result<ConversationRecord, ConversationStoreError> {
        let mut table = self.lock()?;
        let record = table
            .records
            .get_mut(id.as_str())
            .ok_or(ConversationStoreError::NotFound)?;
        record
            .note_usage(tokens, ceiling)
            .map_err(|_| ConversationStoreError::Archived)?;
        let updated = record.clone();
        let turns = table.turns.entry(id.as_str().to_string()).or_default();
        let seq = turns.len() as u64 + 1;
        turns.push(TurnRecord {
            conversation_id: id.clone(),
            seq,
            user_text: user_text.to_string(),
            assistant_text: assistant_text.to_string(),
            tokens_used: tokens,
        });
        Ok(updated)
    }

    fn transcript(&self, id: &ConversationId) -> Result<Vec<TurnRecord>, ConversationStoreError> {
        let table = self.lock()?;
        table
            .turns
            .get(id.as_str())
            .cloned()
            .ok_or(ConversationStoreError::NotFound)
    }

    fn archive(&self, id: &ConversationId) -> Result<(), ConversationStoreError> {
        let mut table = self.lock()?;
        let record = table
            .records
            .get_mut(id.as_str())
            .ok_or(ConversationStoreError::NotFound)?;
        record.archive();
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions."
    )]

    use super::InMemoryConversationStore;
    use super::InMemoryLedgerStore;
    use crate::core::identity::SubjectId;
    use crate::core::time::DayStamp;
    use crate::interfaces::ConversationStore;
    use crate::interfaces::LedgerStore;
    use crate::interfaces::ReserveOutcome;

    fn day() -> DayStamp {
        DayStamp {
            year: 2026,
            month: 8,
            day: 7,
        }
    }

    #[test]
    fn reserve_is_conditional_on_the_cap() {
        let store = InMemoryLedgerStore::new();
        match store.reserve(day(), 800, 1_000).expect("store") {
            ReserveOutcome::Reserved {
                total_after,
            } => assert_eq!(total_after, 800),
            ReserveOutcome::Exhausted {
                ..
            } => panic!("must reserve"),
        }
        match store.reserve(day(), 300, 1_000).expect("store") {
            ReserveOutcome::Exhausted {
                total,
            } => assert_eq!(total, 800),
            ReserveOutcome::Reserved {
                ..
            } => panic!("must exhaust"),
        }
    }

    #[test]
    fn commit_tracks_unique_subjects() {
        let store = InMemoryLedgerStore::new();
        let alice = SubjectId::new("alice");
        let bob = SubjectId::new("bob");
        store.commit(day(), 10, 100, Some(&alice)).expect("commit");
        store.commit(day(), 10, 100, Some(&alice)).expect("commit");
        let entry = store.commit(day(), 10, 100, Some(&bob)).expect("commit");
        assert_eq!(entry.unique_subject_count, 2);
        assert_eq!(entry.request_count, 3);
        assert_eq!(entry.token_count, 300);
    }

    #[test]
    fn mark_alerted_is_a_test_and_set() {
        let store = InMemoryLedgerStore::new();
        assert!(store.mark_alerted(day(), 50).expect("store"));
        assert!(!store.mark_alerted(day(), 50).expect("store"));
        assert!(store.mark_alerted(day(), 75).expect("store"));
    }

    #[test]
    fn turn_sequences_are_monotonic() {
        let store = InMemoryConversationStore::new();
        let record = store.create("sub:alice", None, 0).expect("create");
        store.append_turn(&record.id, "a", "b", 10, 1_000).expect("turn");
        store.append_turn(&record.id, "c", "d", 10, 1_000).expect("turn");
        let transcript = store.transcript(&record.id).expect("transcript");
        let seqs: Vec<u64> = transcript.iter().map(|turn| turn.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }
}
