// crates/tollgate-server/src/identity.rs
// ============================================================================
// Module: Tollgate Identity Resolver
// Description: Bearer-token resolution into request identities.
// Purpose: Derive the {address, subject, tier} tuple every governance
//          component consumes.
// Dependencies: tollgate-config, tollgate-core
// ============================================================================

//! ## Overview
//! The resolver maps inbound credentials to a [`RequestIdentity`]. Requests
//! without credentials resolve to the anonymous tier, keyed by peer address.
//! A presented-but-unknown token fails closed with an authentication error
//! rather than downgrading to anonymous: a revoked subject must not keep
//! consuming the anonymous pool.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::IpAddr;

use thiserror::Error;
use tollgate_config::AuthTokenConfig;
use tollgate_core::RequestIdentity;
use tollgate_core::SubjectId;
use tollgate_core::Tier;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted authorization header size in bytes.
const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Identity resolution errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The authorization header is not a well-formed bearer credential.
    #[error("malformed authorization header")]
    MalformedHeader,
    /// The presented token matches no configured entry.
    #[error("unknown bearer token")]
    UnknownToken,
}

// ============================================================================
// SECTION: Resolver
// ============================================================================

/// Bearer-token identity resolver.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    /// Token table mapping bearer tokens to `(subject, tier)`.
    tokens: BTreeMap<String, (SubjectId, Tier)>,
}

impl IdentityResolver {
    /// Builds a resolver from the configured token table.
    #[must_use]
    pub fn from_config(entries: &[AuthTokenConfig]) -> Self {
        let tokens = entries
            .iter()
            .map(|entry| {
                (entry.token.clone(), (SubjectId::new(entry.subject.clone()), entry.tier))
            })
            .collect();
        Self {
            tokens,
        }
    }

    /// Returns true when no tokens are configured (anonymous-only posture).
    #[must_use]
    pub fn is_anonymous_only(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Resolves an identity from the peer address and optional authorization
    /// header.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] for malformed headers and unknown tokens; the
    /// caller must reject rather than downgrade.
    pub fn resolve(
        &self,
        peer_ip: IpAddr,
        auth_header: Option<&str>,
    ) -> Result<RequestIdentity, AuthError> {
        let address = peer_ip.to_string();
        let Some(header) = auth_header else {
            return Ok(RequestIdentity::anonymous(address));
        };
        if header.len() > MAX_AUTH_HEADER_BYTES {
            return Err(AuthError::MalformedHeader);
        }
        let token = header.strip_prefix("Bearer ").ok_or(AuthError::MalformedHeader)?;
        if token.is_empty() {
            return Err(AuthError::MalformedHeader);
        }
        let (subject, tier) =
            self.tokens.get(token).cloned().ok_or(AuthError::UnknownToken)?;
        Ok(RequestIdentity::authenticated(address, subject, tier))
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

    use std::net::IpAddr;
    use std::net::Ipv4Addr;

    use tollgate_config::AuthTokenConfig;
    use tollgate_core::Tier;

    use super::AuthError;
    use super::IdentityResolver;

    fn resolver() -> IdentityResolver {
        IdentityResolver::from_config(&[AuthTokenConfig {
            token: "tok-alice".to_string(),
            subject: "alice".to_string(),
            tier: Tier::Standard,
        }])
    }

    fn peer() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1))
    }

    #[test]
    fn absent_credentials_resolve_to_anonymous() {
        let identity = resolver().resolve(peer(), None).expect("anonymous");
        assert!(identity.is_anonymous());
        assert_eq!(identity.tier, Tier::Anonymous);
        assert_eq!(identity.address, "203.0.113.1");
    }

    #[test]
    fn known_tokens_resolve_to_their_subject_and_tier() {
        let identity =
            resolver().resolve(peer(), Some("Bearer tok-alice")).expect("authenticated");
        assert_eq!(identity.tier, Tier::Standard);
        assert_eq!(identity.subject.map(|s| s.as_str().to_string()), Some("alice".to_string()));
    }

    #[test]
    fn unknown_tokens_fail_closed() {
        assert_eq!(
            resolver().resolve(peer(), Some("Bearer tok-revoked")),
            Err(AuthError::UnknownToken)
        );
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(
            resolver().resolve(peer(), Some("Basic dXNlcjpwdw==")),
            Err(AuthError::MalformedHeader)
        );
        assert_eq!(resolver().resolve(peer(), Some("Bearer ")), Err(AuthError::MalformedHeader));
    }
}
