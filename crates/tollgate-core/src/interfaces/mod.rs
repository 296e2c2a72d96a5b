// crates/tollgate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Tollgate Interfaces
// Description: Backend-agnostic seams for usage, ledger, conversation storage,
//              budget alerts, and the model-call collaborator.
// Purpose: Define the contract surfaces used by the governance runtime.
// Dependencies: crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how the governance layer integrates with external
//! systems without embedding backend-specific details. Every
//! check-and-increment exposed here is a single atomic operation against the
//! store, never a read, compare, then separate write; that is what keeps
//! concurrent handlers and multiple service instances correct without
//! in-process locks. Implementations must fail closed: a store that cannot
//! answer must produce an error, never a silent allow.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::conversation::ConversationRecord;
use crate::core::conversation::TurnRecord;
use crate::core::estimate::TokenUsage;
use crate::core::identity::ConversationId;
use crate::core::identity::SubjectId;
use crate::core::time::DayStamp;

// ============================================================================
// SECTION: Daily Token Usage
// ============================================================================

/// Accumulated token usage for one subject on one calendar day.
///
/// # Invariants
/// - `tokens_used` is non-decreasing within the day; the reset is implicit in
///   the day key changing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTokenUsage {
    /// Subject the usage is attributed to.
    pub subject: SubjectId,
    /// UTC calendar day.
    pub day: DayStamp,
    /// Tokens consumed so far.
    pub tokens_used: u64,
    /// Requests committed so far.
    pub request_count: u64,
}

/// Usage store errors.
#[derive(Debug, Error)]
pub enum UsageStoreError {
    /// The usage store is unreachable or failed the operation.
    #[error("usage store error: {0}")]
    Storage(String),
}

/// Per-subject daily token usage store.
pub trait UsageStore: Send + Sync {
    /// Returns the usage row for `(subject, day)`, zeroed when absent.
    ///
    /// # Errors
    ///
    /// Returns [`UsageStoreError`] when the store cannot answer; callers must
    /// treat this as a deny.
    fn usage(&self, subject: &SubjectId, day: DayStamp) -> Result<DailyTokenUsage, UsageStoreError>;

    /// Atomically adds committed usage to the `(subject, day)` row, creating
    /// it if needed, and counts one request.
    ///
    /// # Errors
    ///
    /// Returns [`UsageStoreError`] when the upsert-increment fails.
    fn add_usage(
        &self,
        subject: &SubjectId,
        day: DayStamp,
        tokens: u64,
    ) -> Result<(), UsageStoreError>;
}

// ============================================================================
// SECTION: Budget Ledger
// ============================================================================

/// Aggregate spend and usage for one calendar day.
///
/// # Invariants
/// - `total_spend_minor` only increases within a day; rows are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLedgerEntry {
    /// UTC calendar day.
    pub day: DayStamp,
    /// Spend to date in minor currency units, including speculative
    /// reservations.
    pub total_spend_minor: u64,
    /// Committed request count.
    pub request_count: u64,
    /// Committed token count.
    pub token_count: u64,
    /// Distinct subjects that committed usage.
    pub unique_subject_count: u64,
}

impl BudgetLedgerEntry {
    /// Returns a zeroed entry for a day.
    #[must_use]
    pub const fn zero(day: DayStamp) -> Self {
        Self {
            day,
            total_spend_minor: 0,
            request_count: 0,
            token_count: 0,
            unique_subject_count: 0,
        }
    }
}

/// Outcome of a speculative budget reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The estimate was added; spend remains within the cap.
    Reserved {
        /// Spend total after the reservation.
        total_after: u64,
    },
    /// Adding the estimate would exceed the cap; nothing was added.
    Exhausted {
        /// Spend total at the time of the check.
        total: u64,
    },
}

/// Ledger store errors.
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    /// The ledger store is unreachable or failed the operation.
    #[error("ledger store error: {0}")]
    Storage(String),
}

/// Global daily spend ledger store.
pub trait LedgerStore: Send + Sync {
    /// Atomically adds `estimate_minor` to the day's spend iff the result
    /// stays within `cap_minor`.
    ///
    /// The conditional add must be a single store-level operation; the
    /// reservation is never rolled back by callers.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerStoreError`] when the store cannot perform the
    /// conditional add; callers must treat this as a deny.
    fn reserve(
        &self,
        day: DayStamp,
        estimate_minor: u64,
        cap_minor: u64,
    ) -> Result<ReserveOutcome, LedgerStoreError>;

    /// Atomically adds committed actuals to the day's row and returns the
    /// updated entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerStoreError`] when the upsert-increment fails.
    fn commit(
        &self,
        day: DayStamp,
        actual_minor: u64,
        tokens: u64,
        subject: Option<&SubjectId>,
    ) -> Result<BudgetLedgerEntry, LedgerStoreError>;

    /// Returns the day's ledger entry, zeroed when absent.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerStoreError`] when the store cannot answer.
    fn entry(&self, day: DayStamp) -> Result<BudgetLedgerEntry, LedgerStoreError>;

    /// Atomically records that a threshold alert fired for the day; returns
    /// true when this call was the first to record it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerStoreError`] when the test-and-set fails.
    fn mark_alerted(&self, day: DayStamp, threshold_pct: u8) -> Result<bool, LedgerStoreError>;
}

// ============================================================================
// SECTION: Conversation Store
// ============================================================================

/// Conversation store errors.
#[derive(Debug, Error)]
pub enum ConversationStoreError {
    /// The conversation store is unreachable or failed the operation.
    #[error("conversation store error: {0}")]
    Storage(String),
    /// The conversation does not exist.
    #[error("conversation not found")]
    NotFound,
    /// The conversation is archived and accepts no further turns.
    #[error("conversation is archived")]
    Archived,
}

/// Conversation and turn storage.
pub trait ConversationStore: Send + Sync {
    /// Creates a conversation and mints its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationStoreError`] when the insert fails.
    fn create(
        &self,
        owner: &str,
        summary_context: Option<String>,
        created_at_ms: i64,
    ) -> Result<ConversationRecord, ConversationStoreError>;

    /// Loads a conversation record by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationStoreError`] when the store cannot answer.
    fn load(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationRecord>, ConversationStoreError>;

    /// Appends a completed turn and atomically adds its tokens to the
    /// conversation total, flipping `active` to `limit_reached` on crossing
    /// `ceiling`. Returns the updated record.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationStoreError::Archived`] for archived
    /// conversations and [`ConversationStoreError::NotFound`] for unknown
    /// identifiers.
    fn append_turn(
        &self,
        id: &ConversationId,
        user_text: &str,
        assistant_text: &str,
        tokens: u64,
        ceiling: u64,
    ) -> Result<ConversationRecord, ConversationStoreError>;

    /// Returns the full turn transcript in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationStoreError`] when the store cannot answer.
    fn transcript(&self, id: &ConversationId) -> Result<Vec<TurnRecord>, ConversationStoreError>;

    /// Transitions a conversation to its terminal archived state.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationStoreError::NotFound`] for unknown identifiers.
    fn archive(&self, id: &ConversationId) -> Result<(), ConversationStoreError>;
}

// ============================================================================
// SECTION: Budget Alerts
// ============================================================================

/// One fired budget threshold notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetAlert {
    /// UTC calendar day the alert applies to.
    pub day: DayStamp,
    /// Threshold percentage that was crossed.
    pub threshold_pct: u8,
    /// Spend total at the time of the alert, in minor units.
    pub total_spend_minor: u64,
    /// Configured daily cap, in minor units.
    pub cap_minor: u64,
}

/// Sink for budget threshold notifications.
///
/// Delivery is at most once per threshold per day; the once-guard lives in
/// the ledger store, not in sink implementations.
pub trait AlertSink: Send + Sync {
    /// Delivers a budget threshold notification.
    fn budget_threshold(&self, alert: &BudgetAlert);
}

/// Alert sink that discards notifications.
pub struct NoopAlertSink;

impl AlertSink for NoopAlertSink {
    fn budget_threshold(&self, _alert: &BudgetAlert) {}
}

// ============================================================================
// SECTION: Model Collaborator
// ============================================================================

/// One prior turn supplied to the model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTurn {
    /// User message text.
    pub user_text: String,
    /// Assistant reply text.
    pub assistant_text: String,
}

/// Bounded prompt handed to the model collaborator.
///
/// # Invariants
/// - `max_output_tokens` is the tier's output ceiling; the collaborator must
///   not exceed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Seed context (e.g. a remediation summary), when present.
    pub context: Option<String>,
    /// Prior turns in sequence order.
    pub history: Vec<ModelTurn>,
    /// Current user message.
    pub message: String,
    /// Output-length ceiling for the call.
    pub max_output_tokens: u32,
}

/// Completed model reply with its usage report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelReply {
    /// Assistant text produced by the model.
    pub text: String,
    /// Token usage reported by the model.
    pub usage: TokenUsage,
}

/// Model call errors.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The call failed; `partial_usage` carries any usage the model reported
    /// before failing, which is the only thing callers may commit.
    #[error("model call failed: {reason}")]
    Failed {
        /// Diagnostic reason, never surfaced to clients.
        reason: String,
        /// Usage reported by the model before the failure, if any.
        partial_usage: Option<TokenUsage>,
    },
}

impl ModelError {
    /// Returns any usage the model reported before failing.
    #[must_use]
    pub const fn partial_usage(&self) -> Option<&TokenUsage> {
        match self {
            Self::Failed {
                partial_usage,
                ..
            } => partial_usage.as_ref(),
        }
    }
}

/// Hosted language-model endpoint, treated as a black box.
pub trait ModelClient: Send + Sync {
    /// Issues one model call with a bounded prompt and output ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when the call fails; any reported partial usage
    /// is carried in the error.
    fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError>;
}
