// crates/tollgate-core/src/core/counter.rs
// ============================================================================
// Module: Tollgate Counters
// Description: Windowed counter keys and the atomic counter-store seam.
// Purpose: Provide increment-with-expiry counters without application locks.
// Dependencies: crate::core::time, serde, thiserror
// ============================================================================

//! ## Overview
//! Rate limiting is built on counters addressed by a composite
//! [`CounterKey`]: a scope (address or subject), a time window, and the
//! window's boundary start. The single store operation is an atomic
//! increment that returns the post-increment count and the remaining TTL in
//! one round trip, which is what makes concurrent checks race-free without
//! in-process locks. Counters are created on first increment and expire at
//! the window boundary; the application never deletes them explicitly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::time::Window;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default bound on distinct live counters held by the in-memory store.
const DEFAULT_MAX_COUNTER_ENTRIES: usize = 65_536;

// ============================================================================
// SECTION: Counter Keys
// ============================================================================

/// Dimension a counter is keyed on.
///
/// # Invariants
/// - Variants are stable for serialization and counter-key encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterScope {
    /// Counter keyed by caller network address.
    Address,
    /// Counter keyed by authenticated subject.
    Subject,
}

impl CounterScope {
    /// Returns a stable label for the scope.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Address => "addr",
            Self::Subject => "sub",
        }
    }
}

/// Composite key addressing one windowed counter.
///
/// # Invariants
/// - `boundary_start` is the UTC truncation of the instant the counter was
///   first incremented; the counter logically expires at
///   `boundary_start + window length`.
/// - The value behind a key is monotonically non-decreasing within its window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey {
    /// Scope dimension.
    pub scope: CounterScope,
    /// Scope value (address or subject string).
    pub scope_value: String,
    /// Time window bounded by this counter.
    pub window: Window,
    /// Window boundary start in unix seconds.
    pub boundary_start: i64,
}

impl CounterKey {
    /// Builds the counter key for a scope at the window containing `now`.
    #[must_use]
    pub fn at(
        scope: CounterScope,
        scope_value: impl Into<String>,
        window: Window,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            scope,
            scope_value: scope_value.into(),
            window,
            boundary_start: window.boundary_start(now),
        }
    }

    /// Returns the unix second at which this counter expires.
    #[must_use]
    pub const fn expires_at(&self) -> i64 {
        self.boundary_start + self.window.length_secs()
    }

    /// Returns the stable storage key string.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.scope.as_str(),
            self.scope_value,
            self.window.as_str(),
            self.boundary_start
        )
    }
}

/// Post-increment counter observation.
///
/// # Invariants
/// - `count` includes the increment performed by the call that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSample {
    /// Counter value after the increment.
    pub count: u64,
    /// Seconds until the counter's window expires.
    pub ttl_secs: u64,
}

// ============================================================================
// SECTION: Store Seam
// ============================================================================

/// Counter store errors.
#[derive(Debug, Error)]
pub enum CounterStoreError {
    /// The counter store is unreachable or failed the operation.
    #[error("counter store error: {0}")]
    Unavailable(String),
}

/// Atomic increment-with-expiry counter store.
///
/// Implementations must perform the increment and the post-increment read as
/// one atomic operation; a read-compare-write split would let two concurrent
/// requests both observe an under-limit count.
pub trait CounterStore: Send + Sync {
    /// Atomically increments the counter and returns the post-increment
    /// sample.
    ///
    /// # Errors
    ///
    /// Returns [`CounterStoreError`] when the store cannot perform the
    /// increment; callers must treat this as a deny.
    fn increment(
        &self,
        key: &CounterKey,
        now: OffsetDateTime,
    ) -> Result<CounterSample, CounterStoreError>;
}

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// One live counter held by the in-memory store.
#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    /// Current counter value.
    count: u64,
    /// Unix second at which the counter expires.
    expires_at: i64,
}

/// In-memory counter store for tests, demos, and single-process deployments.
///
/// # Invariants
/// - Expired entries are pruned on every increment; the live set is bounded
///   by `max_entries` with oldest-expiry eviction on overflow.
#[derive(Debug, Clone)]
pub struct InMemoryCounterStore {
    /// Live counters keyed by storage key.
    entries: Arc<Mutex<BTreeMap<String, CounterEntry>>>,
    /// Bound on distinct live counters.
    max_entries: usize,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    /// Creates a store with the default entry bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_COUNTER_ENTRIES)
    }

    /// Creates a store with an explicit entry bound.
    #[must_use]
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            max_entries,
        }
    }
}

impl CounterStore for InMemoryCounterStore {
    fn increment(
        &self,
        key: &CounterKey,
        now: OffsetDateTime,
    ) -> Result<CounterSample, CounterStoreError> {
        let now_secs = now.unix_timestamp();
        let expires_at = key.expires_at();
        let storage_key = key.storage_key();
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CounterStoreError::Unavailable("counter store mutex poisoned".to_string()))?;
        entries.retain(|_, entry| entry.expires_at > now_secs);
        let entry = entries.entry(storage_key).or_insert(CounterEntry {
            count: 0,
            expires_at,
        });
        entry.count = entry.count.saturating_add(1);
        let count = entry.count;
        if entries.len() > self.max_entries {
            evict_soonest_expiry(&mut entries, self.max_entries);
        }
        drop(entries);
        let ttl = expires_at - now_secs;
        Ok(CounterSample {
            count,
            ttl_secs: u64::try_from(ttl).unwrap_or(1).max(1),
        })
    }
}

/// Evicts counters closest to expiry until the map is within bounds.
fn evict_soonest_expiry(entries: &mut BTreeMap<String, CounterEntry>, max_entries: usize) {
    while entries.len() > max_entries {
        let victim = entries
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                entries.remove(&key);
            }
            None => break,
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

    use time::OffsetDateTime;

    use super::CounterKey;
    use super::CounterScope;
    use super::CounterStore;
    use super::InMemoryCounterStore;
    use crate::core::time::Window;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(secs).expect("timestamp")
    }

    #[test]
    fn increment_returns_post_increment_count() {
        let store = InMemoryCounterStore::new();
        let now = at(1_000_000_000);
        let key = CounterKey::at(CounterScope::Address, "10.0.0.1", Window::Minute, now);
        assert_eq!(store.increment(&key, now).expect("sample").count, 1);
        assert_eq!(store.increment(&key, now).expect("sample").count, 2);
        assert_eq!(store.increment(&key, now).expect("sample").count, 3);
    }

    #[test]
    fn counters_reset_when_window_rolls_over() {
        let store = InMemoryCounterStore::new();
        let now = at(1_000_000_000);
        let key = CounterKey::at(CounterScope::Address, "10.0.0.1", Window::Minute, now);
        store.increment(&key, now).expect("sample");
        let later = at(1_000_000_000 + 120);
        let next_key = CounterKey::at(CounterScope::Address, "10.0.0.1", Window::Minute, later);
        let sample = store.increment(&next_key, later).expect("sample");
        assert_eq!(sample.count, 1);
    }

    #[test]
    fn ttl_never_exceeds_window_length() {
        let store = InMemoryCounterStore::new();
        let now = at(1_000_000_037);
        let key = CounterKey::at(CounterScope::Subject, "alice", Window::Minute, now);
        let sample = store.increment(&key, now).expect("sample");
        assert!(sample.ttl_secs >= 1);
        assert!(sample.ttl_secs <= 60);
    }

    #[test]
    fn overflow_evicts_rather_than_grows() {
        let store = InMemoryCounterStore::with_max_entries(4);
        let now = at(1_000_000_000);
        for i in 0..16 {
            let key =
                CounterKey::at(CounterScope::Address, format!("10.0.0.{i}"), Window::Day, now);
            store.increment(&key, now).expect("sample");
        }
        let key = CounterKey::at(CounterScope::Address, "10.0.0.3", Window::Day, now);
        let sample = store.increment(&key, now).expect("sample");
        assert!(sample.count >= 1);
    }
}
