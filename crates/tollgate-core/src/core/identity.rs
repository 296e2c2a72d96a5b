// crates/tollgate-core/src/core/identity.rs
// ============================================================================
// Module: Tollgate Identities and Tiers
// Description: Request identity, subject/conversation identifiers, tier table.
// Purpose: Provide strongly typed identity inputs for governance decisions.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every inbound request is evaluated against a [`RequestIdentity`] resolved
//! by the host transport: the caller's network address, an optional
//! authenticated subject, and a tier. Identities are ephemeral and recomputed
//! per request; they are never persisted on their own.
//!
//! Tier limits are data, not code: [`TierTable`] is a lookup table keyed by
//! [`Tier`], so adding or adjusting a tier is a configuration change.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Opaque identifier for an authenticated subject.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization or validation is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Creates a new subject identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque identifier for a conversation thread.
///
/// # Invariants
/// - Opaque UTF-8 string minted by the conversation store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Creates a new conversation identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Tiers
// ============================================================================

/// Access tier assigned to a request identity.
///
/// # Invariants
/// - Variants are stable for serialization and configuration keys.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Unauthenticated caller, keyed by network address only.
    Anonymous,
    /// Authenticated caller with default limits.
    Standard,
    /// Authenticated caller with raised limits.
    Elevated,
}

impl Tier {
    /// Returns a stable label for the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Standard => "standard",
            Self::Elevated => "elevated",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tier governance limits.
///
/// # Invariants
/// - All limits are positive; zero-valued limits are rejected at config load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Maximum requests per minute window.
    pub requests_per_minute: u32,
    /// Maximum requests per hour window.
    pub requests_per_hour: u32,
    /// Maximum requests per day window.
    pub requests_per_day: u32,
    /// Maximum model tokens per subject per calendar day.
    pub daily_token_limit: u64,
    /// Output-length ceiling passed to the model call.
    pub max_output_tokens: u32,
}

/// Lookup table mapping tiers to their limits.
///
/// # Invariants
/// - Lookup failures are governance failures; callers must fail closed when a
///   tier has no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable {
    /// Tier limit entries.
    entries: BTreeMap<Tier, TierPolicy>,
}

impl TierTable {
    /// Builds a tier table from explicit entries.
    #[must_use]
    pub const fn new(entries: BTreeMap<Tier, TierPolicy>) -> Self {
        Self {
            entries,
        }
    }

    /// Returns the policy for a tier, if configured.
    #[must_use]
    pub fn policy_for(&self, tier: Tier) -> Option<&TierPolicy> {
        self.entries.get(&tier)
    }

    /// Returns the configured tier entries.
    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<Tier, TierPolicy> {
        &self.entries
    }
}

// ============================================================================
// SECTION: Request Identity
// ============================================================================

/// Identity a single request is evaluated against.
///
/// # Invariants
/// - `subject` is `None` exactly when `tier` is [`Tier::Anonymous`].
/// - Recomputed per request; never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    /// Caller network address as resolved by the transport.
    pub address: String,
    /// Authenticated subject, when present.
    pub subject: Option<SubjectId>,
    /// Access tier for limit lookup.
    pub tier: Tier,
}

impl RequestIdentity {
    /// Builds an anonymous identity keyed by network address.
    #[must_use]
    pub fn anonymous(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            subject: None,
            tier: Tier::Anonymous,
        }
    }

    /// Builds an authenticated identity.
    #[must_use]
    pub fn authenticated(address: impl Into<String>, subject: SubjectId, tier: Tier) -> Self {
        Self {
            address: address.into(),
            subject: Some(subject),
            tier,
        }
    }

    /// Returns true when the identity carries no authenticated subject.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        self.subject.is_none()
    }

    /// Returns the ownership key used for conversation records.
    ///
    /// Authenticated identities own conversations by subject; anonymous
    /// identities own them by network address.
    #[must_use]
    pub fn owner_key(&self) -> String {
        match &self.subject {
            Some(subject) => format!("sub:{subject}"),
            None => format!("addr:{}", self.address),
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

    use super::RequestIdentity;
    use super::SubjectId;
    use super::Tier;

    #[test]
    fn owner_key_distinguishes_subject_and_address() {
        let anon = RequestIdentity::anonymous("10.0.0.9");
        let auth =
            RequestIdentity::authenticated("10.0.0.9", SubjectId::new("alice"), Tier::Standard);
        assert_eq!(anon.owner_key(), "addr:10.0.0.9");
        assert_eq!(auth.owner_key(), "sub:alice");
    }

    #[test]
    fn tier_labels_are_stable() {
        assert_eq!(Tier::Anonymous.as_str(), "anonymous");
        assert_eq!(Tier::Standard.as_str(), "standard");
        assert_eq!(Tier::Elevated.as_str(), "elevated");
    }
}
