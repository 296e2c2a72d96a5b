// crates/tollgate-core/src/runtime/quota.rs
// ============================================================================
// Module: Tollgate Token Quota Enforcer
// Description: Per-subject daily token quota checks and commits.
// Purpose: Reject requests that would breach a subject's daily allotment
//          before any model call is made.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The quota enforcer reads the `(subject, day)` usage row and denies when
//! the estimated request cost would breach the tier's daily token limit.
//! After the model call completes, the actual reported usage (which may
//! differ from the estimate) is committed with an atomic upsert-increment,
//! so concurrent requests from the same subject serialize at the store.
//! Anonymous identities are exempt: they have no durable subject key to
//! attribute usage to and are bounded by the rate limiter's fixed request
//! counts instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identity::SubjectId;
use crate::core::time::DayStamp;
use crate::interfaces::UsageStore;
use crate::interfaces::UsageStoreError;

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// Quota denial detail surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDenial {
    /// Tokens already used by the subject today.
    pub used: u64,
    /// The subject's daily token limit.
    pub limit: u64,
}

/// Quota enforcement decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// The estimate fits within the remaining allotment.
    Allowed,
    /// The estimate would breach the daily limit.
    Denied(QuotaDenial),
}

// ============================================================================
// SECTION: Enforcer
// ============================================================================

/// Per-subject daily token quota enforcer.
#[derive(Clone)]
pub struct TokenQuota {
    /// Usage store backing the per-subject daily rows.
    store: Arc<dyn UsageStore>,
}

impl TokenQuota {
    /// Builds a quota enforcer over a usage store.
    #[must_use]
    pub const fn new(store: Arc<dyn UsageStore>) -> Self {
        Self {
            store,
        }
    }

    /// Checks whether an estimated request fits the subject's remaining
    /// daily allotment.
    ///
    /// # Errors
    ///
    /// Returns [`UsageStoreError`] when the store cannot answer; callers
    /// must fail closed.
    pub fn reserve(
        &self,
        subject: &SubjectId,
        daily_limit: u64,
        estimated_tokens: u64,
        day: DayStamp,
    ) -> Result<QuotaDecision, UsageStoreError> {
        let usage = self.store.usage(subject, day)?;
        if usage.tokens_used.saturating_add(estimated_tokens) > daily_limit {
            return Ok(QuotaDecision::Denied(QuotaDenial {
                used: usage.tokens_used,
                limit: daily_limit,
            }));
        }
        Ok(QuotaDecision::Allowed)
    }

    /// Commits actual reported usage to the subject's daily row.
    ///
    /// # Errors
    ///
    /// Returns [`UsageStoreError`] when the upsert-increment fails.
    pub fn commit(
        &self,
        subject: &SubjectId,
        day: DayStamp,
        actual_tokens: u64,
    ) -> Result<(), UsageStoreError> {
        self.store.add_usage(subject, day, actual_tokens)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
