// crates/tollgate-core/src/core/time.rs
// ============================================================================
// Module: Tollgate Time Model
// Description: Window boundaries and UTC calendar-day stamps.
// Purpose: Provide deterministic time math; the core never reads wall clocks.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Governance decisions are functions of an explicit `now` supplied by the
//! host; the core never reads wall-clock time directly. This keeps every
//! limit, quota, and breaker decision deterministic under test. Windows are
//! UTC truncations; calendar days are UTC dates.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Windows
// ============================================================================

/// Fixed time buckets over which request counts are bounded.
///
/// # Invariants
/// - Variants are stable for serialization and counter-key encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    /// Sixty-second bucket.
    Minute,
    /// Sixty-minute bucket.
    Hour,
    /// UTC calendar-day bucket.
    Day,
}

impl Window {
    /// Returns the window length in seconds.
    #[must_use]
    pub const fn length_secs(self) -> i64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }

    /// Returns a stable label for the window.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    /// Returns the UTC boundary start (unix seconds) containing `now`.
    #[must_use]
    pub const fn boundary_start(self, now: OffsetDateTime) -> i64 {
        let secs = now.unix_timestamp();
        secs - secs.rem_euclid(self.length_secs())
    }

    /// Returns the seconds remaining until the window containing `now` expires.
    ///
    /// The result is at least one second so retry hints are never zero for a
    /// window that is still open.
    #[must_use]
    pub const fn ttl_remaining_secs(self, now: OffsetDateTime) -> u64 {
        let expires = self.boundary_start(now) + self.length_secs();
        let remaining = expires - now.unix_timestamp();
        if remaining < 1 { 1 } else { remaining as u64 }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Day Stamps
// ============================================================================

/// UTC calendar day used to key daily ledger and usage rows.
///
/// # Invariants
/// - Ordering matches chronological order.
/// - `key()` is stable (`YYYY-MM-DD`) for storage keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayStamp {
    /// Calendar year.
    pub year: i32,
    /// Calendar month (1-12).
    pub month: u8,
    /// Calendar day of month (1-31).
    pub day: u8,
}

impl DayStamp {
    /// Derives the UTC day stamp for an instant.
    #[must_use]
    pub fn from_datetime(now: OffsetDateTime) -> Self {
        let date = now.date();
        Self {
            year: date.year(),
            month: u8::from(date.month()),
            day: date.day(),
        }
    }

    /// Returns the stable `YYYY-MM-DD` storage key.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl fmt::Display for DayStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
