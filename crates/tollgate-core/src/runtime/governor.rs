// crates/tollgate-core/src/runtime/governor.rs
// ============================================================================
// Module: Tollgate Conversation Length Governor
// Description: Per-conversation token ceiling enforcement and remediation
//              sequencing.
// Purpose: Block over-long threads and sequence summarize-archive-recreate.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The governor owns the one conversation row relevant to the current
//! request. It answers `can_accept` before every message is dispatched to
//! the model, commits completed turns (which may flip the conversation to
//! `limit_reached`), and sequences remediation: the successor conversation
//! is durably created before the original is archived, so a failed
//! summarization leaves the system in the pre-remediation state and the
//! caller may retry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use crate::core::conversation::ConversationRecord;
use crate::core::conversation::ConversationState;
use crate::core::conversation::TurnRecord;
use crate::core::identity::ConversationId;
use crate::interfaces::ConversationStore;
use crate::interfaces::ConversationStoreError;

// ============================================================================
// SECTION: Governor
// ============================================================================

/// Conversation length governor.
#[derive(Clone)]
pub struct ConversationGovernor {
    /// Conversation store backing records and transcripts.
    store: Arc<dyn ConversationStore>,
    /// Hard token ceiling per conversation.
    ceiling: u64,
}

impl ConversationGovernor {
    /// Builds a governor over a conversation store.
    #[must_use]
    pub const fn new(store: Arc<dyn ConversationStore>, ceiling: u64) -> Self {
        Self {
            store,
            ceiling,
        }
    }

    /// Returns the configured token ceiling.
    #[must_use]
    pub const fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Loads a conversation owned by `owner`.
    ///
    /// Ownership mismatches are reported as not-found so the existence of
    /// other owners' conversations is not disclosed.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationStoreError`] when the store cannot answer.
    pub fn load_owned(
        &self,
        id: &ConversationId,
        owner: &str,
    ) -> Result<Option<ConversationRecord>, ConversationStoreError> {
        let record = self.store.load(id)?;
        Ok(record.filter(|record| record.owner == owner))
    }

    /// Creates a fresh conversation for an owner.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationStoreError`] when the insert fails.
    pub fn create(
        &self,
        owner: &str,
        summary_context: Option<String>,
        created_at_ms: i64,
    ) -> Result<ConversationRecord, ConversationStoreError> {
        self.store.create(owner, summary_context, created_at_ms)
    }

    /// Returns true when the conversation may accept another message.
    #[must_use]
    pub fn can_accept(&self, record: &ConversationRecord) -> bool {
        record.can_accept(self.ceiling)
    }

    /// Commits a completed turn, atomically accumulating tokens and flipping
    /// the state when the ceiling is crossed.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationStoreError`] when the append fails or the
    /// conversation is archived.
    pub fn commit_turn(
        &self,
        id: &ConversationId,
        user_text: &str,
        assistant_text: &str,
        tokens: u64,
    ) -> Result<ConversationRecord, ConversationStoreError> {
        self.store.append_turn(id, user_text, assistant_text, tokens, self.ceiling)
    }

    /// Returns the full transcript for remediation summarization.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationStoreError`] when the store cannot answer.
    pub fn transcript(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<TurnRecord>, ConversationStoreError> {
        self.store.transcript(id)
    }

    /// Completes remediation: creates the successor seeded with the summary,
    /// then archives the original. Creation strictly precedes archival.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationStoreError`] when either step fails. A failure
    /// after creation leaves the original un-archived; re-running remediation
    /// is safe and produces a fresh successor.
    pub fn replace_with_summary(
        &self,
        original: &ConversationId,
        owner: &str,
        summary: String,
        created_at_ms: i64,
    ) -> Result<ConversationRecord, ConversationStoreError> {
        let successor = self.store.create(owner, Some(summary), created_at_ms)?;
        self.store.archive(original)?;
        Ok(successor)
    }

    /// Returns true when a conversation is eligible for remediation.
    #[must_use]
    pub fn needs_remediation(&self, record: &ConversationRecord) -> bool {
        match record.state {
            ConversationState::LimitReached => true,
            ConversationState::Active => record.total_tokens >= self.ceiling,
            ConversationState::Archived => false,
        }
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

    use std::sync::Arc;

    use super::ConversationGovernor;
    use crate::core::conversation::ConversationState;
    use crate::runtime::store::InMemoryConversationStore;

    fn governor(ceiling: u64) -> ConversationGovernor {
        ConversationGovernor::new(Arc::new(InMemoryConversationStore::new()), ceiling)
    }

    #[test]
    fn turns_accumulate_until_the_ceiling_flips_state() {
        let governor = governor(1_000);
        let record = governor.create("sub:alice", None, 0).expect("create");
        assert!(governor.can_accept(&record));
        let record =
            governor.commit_turn(&record.id, "hi", "hello", 600).expect("turn");
        assert!(governor.can_accept(&record));
        let record =
            governor.commit_turn(&record.id, "more", "sure", 500).expect("turn");
        assert_eq!(record.state, ConversationState::LimitReached);
        assert!(!governor.can_accept(&record));
        assert!(governor.needs_remediation(&record));
    }

    #[test]
    fn replacement_creates_before_archiving() {
        let governor = governor(100);
        let original = governor.create("sub:alice", None, 0).expect("create");
        governor.commit_turn(&original.id, "q", "a", 150).expect("turn");
        let successor = governor
            .replace_with_summary(&original.id, "sub:alice", "summary text".to_string(), 1)
            .expect("replace");
        assert_eq!(successor.state, ConversationState::Active);
        assert_eq!(successor.total_tokens, 0);
        assert_eq!(successor.summary_context.as_deref(), Some("summary text"));
        let archived = governor
            .load_owned(&original.id, "sub:alice")
            .expect("store")
            .expect("record");
        assert_eq!(archived.state, ConversationState::Archived);
        assert_eq!(archived.total_tokens, 150);
    }

    #[test]
    fn ownership_mismatch_reads_as_not_found() {
        let governor = governor(100);
        let record = governor.create("sub:alice", None, 0).expect("create");
        assert!(governor.load_owned(&record.id, "sub:mallory").expect("store").is_none());
    }

    #[test]
    fn archived_conversations_reject_turns() {
        let governor = governor(100);
        let original = governor.create("sub:alice", None, 0).expect("create");
        governor.commit_turn(&original.id, "q", "a", 150).expect("turn");
        governor
            .replace_with_summary(&original.id, "sub:alice", "s".to_string(), 1)
            .expect("replace");
        assert!(governor.commit_turn(&original.id, "q2", "a2", 10).is_err());
    }
}
