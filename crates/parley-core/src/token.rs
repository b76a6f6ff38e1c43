//! Session tokens and identity claims.
//!
//! A [`SessionToken`] is immutable once issued. Renewal produces a new token
//! that keeps the context id and carries a fresh key-generation id and key;
//! the old token is superseded, never mutated.

use std::time::{Duration, SystemTime};

use parley_crypto::SymmetricKey;
use serde::{Deserialize, Serialize};

use crate::{config::CachingPolicy, error::NegotiationError};

/// What a claim grants over its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimRight {
    /// The claim identifies the subject
    Identity,
    /// The subject possesses the resource (e.g., a name or group)
    PossessProperty,
}

/// An identity or attribute assertion attached to a session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    /// Claim type URI or short name (e.g., `name`, `group`)
    pub claim_type: String,
    /// Asserted value
    pub resource: String,
    /// Right over the resource
    pub right: ClaimRight,
}

impl Claim {
    /// Identity claim for a named principal.
    pub fn identity(name: impl Into<String>) -> Self {
        Self { claim_type: "name".to_string(), resource: name.into(), right: ClaimRight::Identity }
    }

    /// Property claim, e.g. group membership.
    pub fn property(claim_type: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            resource: resource.into(),
            right: ClaimRight::PossessProperty,
        }
    }
}

/// Raw identity evidence carried in a request's security context.
///
/// A claims resolver turns this into the claims of the issued token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityEvidence {
    /// No evidence presented
    #[default]
    Anonymous,
    /// Username asserted by a lower security layer
    UserName(String),
    /// X.509 certificate identity
    Certificate {
        /// Subject distinguished name
        subject: String,
        /// SHA-1 or SHA-256 thumbprint
        thumbprint: Vec<u8>,
    },
}

/// Symmetric-key session credential with validity window and claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    context_id: String,
    key_generation: String,
    key: SymmetricKey,
    valid_from: SystemTime,
    valid_to: SystemTime,
    claims: Vec<Claim>,
    cookie: Option<Vec<u8>>,
}

impl SessionToken {
    /// Create a token.
    ///
    /// # Errors
    ///
    /// - `ProtocolViolation` if `valid_to <= valid_from`
    /// - `ProtocolViolation` if the context id or key generation is empty
    pub fn new(
        context_id: impl Into<String>,
        key_generation: impl Into<String>,
        key: SymmetricKey,
        valid_from: SystemTime,
        valid_to: SystemTime,
        claims: Vec<Claim>,
    ) -> Result<Self, NegotiationError> {
        let context_id = context_id.into();
        let key_generation = key_generation.into();

        if valid_to <= valid_from {
            return Err(NegotiationError::ProtocolViolation(format!(
                "token {context_id} expires before it becomes valid"
            )));
        }
        if context_id.is_empty() || key_generation.is_empty() {
            return Err(NegotiationError::ProtocolViolation(
                "token context id and key generation must be non-empty".to_string(),
            ));
        }

        Ok(Self { context_id, key_generation, key, valid_from, valid_to, claims, cookie: None })
    }

    /// Attach a cookie, switching the token to cookie mode.
    #[must_use]
    pub fn with_cookie(mut self, cookie: Vec<u8>) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Context id, stable across renewals.
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Key generation id, new on every renewal.
    pub fn key_generation(&self) -> &str {
        &self.key_generation
    }

    /// Session key.
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    /// Start of the validity window.
    pub fn valid_from(&self) -> SystemTime {
        self.valid_from
    }

    /// End of the validity window.
    pub fn valid_to(&self) -> SystemTime {
        self.valid_to
    }

    /// Authorization claims.
    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    /// Opaque cookie for self-contained tokens.
    pub fn cookie(&self) -> Option<&[u8]> {
        self.cookie.as_deref()
    }

    /// True when the token carries its own state and has no server cache
    /// entry.
    pub fn is_cookie_mode(&self) -> bool {
        self.cookie.is_some()
    }

    /// Length of the validity window.
    pub fn lifetime(&self) -> Duration {
        self.valid_to.duration_since(self.valid_from).unwrap_or(Duration::ZERO)
    }

    /// Whether `now` falls inside the validity window.
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        self.valid_from <= now && now < self.valid_to
    }

    /// Whether the token has expired at `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.valid_to
    }

    /// Last instant at which a cached copy may still be handed out.
    ///
    /// `min(valid_from + threshold% × lifetime, valid_from + max_caching_time)`.
    pub fn effective_expiration(&self, policy: &CachingPolicy) -> SystemTime {
        let lifetime_nanos = self.lifetime().as_nanos();
        let threshold_nanos = lifetime_nanos * u128::from(policy.threshold_percent) / 100;
        let by_threshold = self.valid_from
            + Duration::from_nanos(u64::try_from(threshold_nanos).unwrap_or(u64::MAX));

        match policy.max_caching_time.and_then(|max| self.valid_from.checked_add(max)) {
            Some(by_cap) => by_threshold.min(by_cap),
            None => by_threshold,
        }
    }

    /// Whether a cached copy may be reused at `now`.
    pub fn is_fresh_at(&self, now: SystemTime, policy: &CachingPolicy) -> bool {
        now <= self.effective_expiration(policy)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;

    fn token(valid_from_secs: u64, lifetime_secs: u64) -> SessionToken {
        let from = UNIX_EPOCH + Duration::from_secs(valid_from_secs);
        SessionToken::new(
            "urn:ctx",
            "urn:gen",
            SymmetricKey::from_slice(&[1u8; 32]),
            from,
            from + Duration::from_secs(lifetime_secs),
            vec![Claim::identity("alice")],
        )
        .unwrap()
    }

    #[test]
    fn rejects_inverted_window() {
        let now = UNIX_EPOCH + Duration::from_secs(100);
        let result = SessionToken::new(
            "urn:ctx",
            "urn:gen",
            SymmetricKey::from_slice(&[1u8; 32]),
            now,
            now,
            vec![],
        );
        assert!(matches!(result, Err(NegotiationError::ProtocolViolation(_))));
    }

    #[test]
    fn threshold_limits_effective_expiration() {
        let token = token(1_000, 1_000);
        let policy = CachingPolicy { threshold_percent: 60, max_caching_time: None };

        assert_eq!(
            token.effective_expiration(&policy),
            UNIX_EPOCH + Duration::from_secs(1_600)
        );
    }

    #[test]
    fn max_caching_time_wins_when_shorter() {
        let token = token(1_000, 1_000);
        let policy = CachingPolicy {
            threshold_percent: 90,
            max_caching_time: Some(Duration::from_secs(100)),
        };

        assert_eq!(
            token.effective_expiration(&policy),
            UNIX_EPOCH + Duration::from_secs(1_100)
        );
    }

    #[test]
    fn freshness_is_inclusive_at_boundary() {
        let token = token(0, 100);
        let policy = CachingPolicy { threshold_percent: 50, max_caching_time: None };

        assert!(token.is_fresh_at(UNIX_EPOCH + Duration::from_secs(50), &policy));
        assert!(!token.is_fresh_at(UNIX_EPOCH + Duration::from_secs(51), &policy));
    }

    #[test]
    fn cookie_mode_follows_cookie() {
        let plain = token(0, 10);
        assert!(!plain.is_cookie_mode());
        assert!(plain.with_cookie(vec![1, 2, 3]).is_cookie_mode());
    }

    #[test]
    fn validity_window_is_half_open() {
        let token = token(10, 10);
        assert!(!token.is_valid_at(UNIX_EPOCH + Duration::from_secs(9)));
        assert!(token.is_valid_at(UNIX_EPOCH + Duration::from_secs(10)));
        assert!(!token.is_valid_at(UNIX_EPOCH + Duration::from_secs(20)));
        assert!(token.is_expired_at(UNIX_EPOCH + Duration::from_secs(20)));
    }
}
