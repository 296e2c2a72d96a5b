// crates/tollgate-core/src/runtime/budget.rs
// ============================================================================
// Module: Tollgate Budget Ledger
// Description: Global daily spend ledger, threshold alerting, circuit breaker.
// Purpose: Halt all requests once the configured daily spend cap is reached.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! Before any model call, the estimated cost is added speculatively to
//! today's ledger row iff the result stays within the daily cap. The
//! reservation is never rolled back, even when the downstream call fails:
//! this trades slight over-conservatism for the invariant that recorded
//! spend can never exceed the cap by more than one in-flight request's
//! estimate. Actual costs are committed on top of reservations: spend is
//! ratcheted upward, never corrected downward.
//!
//! After each commit the running total is compared against the ordered alert
//! thresholds; each threshold fires at most once per day via a store-level
//! test-and-set. At 100 % the breaker opens and every reservation denies
//! until the UTC day rolls over. Recovery is time-based only; a
//! failure-counting half-open breaker would add complexity without
//! protecting the budget any better.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identity::SubjectId;
use crate::core::time::DayStamp;
use crate::interfaces::AlertSink;
use crate::interfaces::BudgetAlert;
use crate::interfaces::LedgerStore;
use crate::interfaces::LedgerStoreError;
use crate::interfaces::ReserveOutcome;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Budget configuration consumed by the ledger.
///
/// # Invariants
/// - `alert_thresholds_pct` is strictly increasing and within `(0, 100]`;
///   validated at config load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetPolicy {
    /// Daily spend cap in minor currency units.
    pub daily_cap_minor: u64,
    /// Ordered alert thresholds as percentages of the cap.
    pub alert_thresholds_pct: Vec<u8>,
}

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// Budget reservation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    /// The estimate was reserved within the cap.
    Allowed {
        /// Spend total after the reservation, in minor units.
        total_after: u64,
    },
    /// The breaker is open; no reservation was made.
    Exhausted {
        /// Spend total at the time of the check, in minor units.
        total: u64,
        /// Configured daily cap, in minor units.
        cap: u64,
    },
}

// ============================================================================
// SECTION: Ledger
// ============================================================================

/// Global daily spend ledger with threshold alerting and a circuit breaker.
#[derive(Clone)]
pub struct BudgetLedger {
    /// Ledger store backing the daily rows.
    store: Arc<dyn LedgerStore>,
    /// Sink receiving threshold notifications.
    alerts: Arc<dyn AlertSink>,
    /// Budget policy applied by this ledger.
    policy: BudgetPolicy,
}

impl BudgetLedger {
    /// Builds a budget ledger.
    #[must_use]
    pub const fn new(
        store: Arc<dyn LedgerStore>,
        alerts: Arc<dyn AlertSink>,
        policy: BudgetPolicy,
    ) -> Self {
        Self {
            store,
            alerts,
            policy,
        }
    }

    /// Speculatively reserves an estimated cost within the daily cap.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerStoreError`] when the store cannot perform the
    /// conditional add; callers must fail closed.
    pub fn check_and_reserve(
        &self,
        day: DayStamp,
        estimate_minor: u64,
    ) -> Result<BudgetDecision, LedgerStoreError> {
        match self.store.reserve(day, estimate_minor, self.policy.daily_cap_minor)? {
            ReserveOutcome::Reserved {
                total_after,
            } => Ok(BudgetDecision::Allowed {
                total_after,
            }),
            ReserveOutcome::Exhausted {
                total,
            } => Ok(BudgetDecision::Exhausted {
                total,
                cap: self.policy.daily_cap_minor,
            }),
        }
    }

    /// Commits actual cost and usage on top of the speculative reservation,
    /// then fires any newly crossed threshold alerts.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerStoreError`] when the commit fails. Alert test-and-set
    /// failures are swallowed: alerting is best-effort and must not fail a
    /// request whose spend is already recorded.
    pub fn commit(
        &self,
        day: DayStamp,
        actual_minor: u64,
        tokens: u64,
        subject: Option<&SubjectId>,
    ) -> Result<(), LedgerStoreError> {
        let entry = self.store.commit(day, actual_minor, tokens, subject)?;
        for threshold_pct in &self.policy.alert_thresholds_pct {
            if !crossed(entry.total_spend_minor, self.policy.daily_cap_minor, *threshold_pct) {
                continue;
            }
            let newly = self.store.mark_alerted(day, *threshold_pct).unwrap_or(false);
            if newly {
                self.alerts.budget_threshold(&BudgetAlert {
                    day,
                    threshold_pct: *threshold_pct,
                    total_spend_minor: entry.total_spend_minor,
                    cap_minor: self.policy.daily_cap_minor,
                });
            }
        }
        Ok(())
    }
}

/// Returns true when `total` has reached `threshold_pct` percent of `cap`.
fn crossed(total: u64, cap: u64, threshold_pct: u8) -> bool {
    u128::from(total) * 100 >= u128::from(cap) * u128::from(threshold_pct)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
