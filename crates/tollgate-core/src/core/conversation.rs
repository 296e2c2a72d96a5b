// crates/tollgate-core/src/core/conversation.rs
// ============================================================================
// Module: Tollgate Conversation Records
// Description: Conversation lifecycle state machine and turn records.
// Purpose: Capture per-thread token accumulation with explicit transitions.
// Dependencies: crate::core::identity, serde, thiserror
// ============================================================================

//! ## Overview
//! A conversation accumulates tokens across turns until it reaches the
//! configured ceiling, at which point it stops accepting messages and exposes
//! a remediation action. The lifecycle is an explicit tagged state machine
//! (`active -> limit_reached -> archived`) with transition functions on the
//! record type, rather than ad hoc comparisons scattered across call sites.
//! `archived` is terminal: the token total is frozen and no further messages
//! are accepted under that identifier.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identity::ConversationId;

// ============================================================================
// SECTION: Lifecycle State
// ============================================================================

/// Conversation lifecycle state.
///
/// # Invariants
/// - Variants are stable for serialization and storage.
/// - `Archived` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// Accepting messages; token total below the ceiling.
    Active,
    /// Ceiling reached; messages rejected, remediation available.
    LimitReached,
    /// Terminal; token total frozen, succeeded by a new conversation.
    Archived,
}

impl ConversationState {
    /// Returns a stable label for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::LimitReached => "limit_reached",
            Self::Archived => "archived",
        }
    }

    /// Parses a stable state label.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "active" => Some(Self::Active),
            "limit_reached" => Some(Self::LimitReached),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Invalid conversation state transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationTransitionError {
    /// The conversation is archived and accepts no mutation.
    #[error("conversation is archived")]
    Archived,
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// One conversation thread's governance-relevant state.
///
/// # Invariants
/// - `total_tokens` is monotonically non-decreasing while the conversation is
///   not archived, and frozen afterward.
/// - `summary_context` is set only on conversations created by remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Conversation identifier minted by the store.
    pub id: ConversationId,
    /// Ownership key (`sub:<subject>` or `addr:<address>`).
    pub owner: String,
    /// Accumulated token total across all completed turns.
    pub total_tokens: u64,
    /// Lifecycle state.
    pub state: ConversationState,
    /// Seed summary carried over from a remediated predecessor.
    pub summary_context: Option<String>,
    /// Creation timestamp in unix milliseconds.
    pub created_at_ms: i64,
}

impl ConversationRecord {
    /// Returns true when a new message may be dispatched for this
    /// conversation under the given ceiling.
    #[must_use]
    pub fn can_accept(&self, ceiling: u64) -> bool {
        self.state == ConversationState::Active && self.total_tokens < ceiling
    }

    /// Records completed-turn usage, flipping to `LimitReached` on crossing
    /// the ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationTransitionError::Archived`] when the
    /// conversation is archived; archived totals are frozen.
    pub fn note_usage(
        &mut self,
        tokens: u64,
        ceiling: u64,
    ) -> Result<(), ConversationTransitionError> {
        if self.state == ConversationState::Archived {
            return Err(ConversationTransitionError::Archived);
        }
        self.total_tokens = self.total_tokens.saturating_add(tokens);
        if self.state == ConversationState::Active && self.total_tokens >= ceiling {
            self.state = ConversationState::LimitReached;
        }
        Ok(())
    }

    /// Transitions the conversation to its terminal archived state.
    ///
    /// Archiving an already-archived conversation is a no-op; the transition
    /// is idempotent by design of the remediation workflow.
    pub const fn archive(&mut self) {
        self.state = ConversationState::Archived;
    }
}

/// One completed user/assistant turn, append-only.
///
/// # Invariants
/// - `seq` is monotonic within a conversation and assigned by the store.
/// - Turn records are owned exclusively by their conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Conversation the turn belongs to.
    pub conversation_id: ConversationId,
    /// Monotonic sequence within the conversation.
    pub seq: u64,
    /// Raw user message text.
    pub user_text: String,
    /// Assistant reply text.
    pub assistant_text: String,
    /// Tokens consumed by the turn, from the model's usage report.
    pub tokens_used: u64,
}

// ============================================================================
// SECTION: Tests
// ============================================================================
