// crates/tollgate-core/src/runtime/limiter.rs
// ============================================================================
// Module: Tollgate Rate Limiter
// Description: Multi-scope, multi-window request limiting over atomic counters.
// Purpose: Reject request floods early, before any budget is consumed.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! The rate limiter evaluates every `(scope, window, max)` tuple that applies
//! to the identity's tier: anonymous identities are bounded by address-scoped
//! tuples only, authenticated identities by address- and subject-scoped
//! tuples together, so multiple accounts behind one address are still
//! bounded. Each tuple is an atomic increment against the counter store;
//! increments persist even when the call is denied, so a rejected caller
//! still burns quota and retry storms are self-defeating. All tuples are
//! checked even after the first violation so the denial can report the most
//! restrictive applicable limit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::core::counter::CounterKey;
use crate::core::counter::CounterScope;
use crate::core::counter::CounterStore;
use crate::core::counter::CounterStoreError;
use crate::core::identity::RequestIdentity;
use crate::core::identity::TierPolicy;
use crate::core::time::Window;

// ============================================================================
// SECTION: Decisions
// ============================================================================

/// One violated limit tuple.
///
/// # Invariants
/// - `retry_after_secs` is the remaining TTL of the violated window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDenial {
    /// Scope of the violated counter.
    pub scope: CounterScope,
    /// Window of the violated counter.
    pub window: Window,
    /// Configured maximum for the tuple.
    pub limit: u32,
    /// Seconds until the violated window expires.
    pub retry_after_secs: u64,
}

/// Rate limiter decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// All applicable tuples are within limits.
    Allowed,
    /// At least one tuple is violated; the denial reports the most
    /// restrictive one (the violated window that clears last).
    Denied(RateDenial),
}

// ============================================================================
// SECTION: Limiter
// ============================================================================

/// Multi-scope, multi-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    /// Atomic counter store backing all windows.
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    /// Builds a limiter over a counter store.
    #[must_use]
    pub const fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
        }
    }

    /// Checks all applicable tuples for the identity, incrementing each.
    ///
    /// # Errors
    ///
    /// Returns [`CounterStoreError`] when the counter store is unavailable;
    /// callers must fail closed.
    pub fn check(
        &self,
        identity: &RequestIdentity,
        policy: &TierPolicy,
        now: OffsetDateTime,
    ) -> Result<RateDecision, CounterStoreError> {
        let mut violations: Vec<RateDenial> = Vec::new();
        for (scope, scope_value) in scope_values(identity) {
            for (window, limit) in window_limits(policy) {
                if limit == 0 {
                    continue;
                }
                let key = CounterKey::at(scope, scope_value.clone(), window, now);
                let sample = self.store.increment(&key, now)?;
                if sample.count > u64::from(limit) {
                    violations.push(RateDenial {
                        scope,
                        window,
                        limit,
                        retry_after_secs: sample.ttl_secs,
                    });
                }
            }
        }
        Ok(most_restrictive(violations).map_or(RateDecision::Allowed, RateDecision::Denied))
    }
}

/// Returns the scope dimensions applicable to the identity.
fn scope_values(identity: &RequestIdentity) -> Vec<(CounterScope, String)> {
    let mut scopes = vec![(CounterScope::Address, identity.address.clone())];
    if let Some(subject) = &identity.subject {
        scopes.push((CounterScope::Subject, subject.as_str().to_string()));
    }
    scopes
}

/// Returns the window limits configured for a tier.
const fn window_limits(policy: &TierPolicy) -> [(Window, u32); 3] {
    [
        (Window::Minute, policy.requests_per_minute),
        (Window::Hour, policy.requests_per_hour),
        (Window::Day, policy.requests_per_day),
    ]
}

/// Picks the violation whose window clears last.
///
/// A caller that waits out this hint is not immediately re-denied by another
/// already-violated window.
fn most_restrictive(violations: Vec<RateDenial>) -> Option<RateDenial> {
    violations.into_iter().max_by_key(|denial| denial.retry_after_secs)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
