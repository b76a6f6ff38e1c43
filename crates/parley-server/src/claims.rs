//! Identity resolution collaborators.
//!
//! A [`ClaimsResolver`] turns the identity evidence a lower security layer
//! attached to a request into the claims carried by the issued token. A
//! [`CredentialStore`] supplies the pre-shared keys challenge negotiation
//! proves possession of.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, PoisonError},
};

use parley_core::{Claim, IdentityEvidence, NegotiationError};
use parley_crypto::SymmetricKey;

/// Maps identity evidence to authorization claims.
pub trait ClaimsResolver: Send + Sync {
    /// Resolve claims for `evidence`.
    ///
    /// # Errors
    ///
    /// - `AuthenticationFailed` if the identity is not accepted
    /// - `MalformedCredential` if the evidence cannot be interpreted
    fn resolve(&self, evidence: &IdentityEvidence) -> Result<Vec<Claim>, NegotiationError>;
}

/// Looks up a principal's pre-shared credential.
pub trait CredentialStore: Send + Sync {
    /// Credential for `principal`, if known.
    fn lookup(&self, principal: &str) -> Option<SymmetricKey>;
}

/// In-memory resolver with per-user group memberships.
#[derive(Debug, Default)]
pub struct InMemoryClaimsResolver {
    users: HashMap<String, Vec<String>>,
    trusted_thumbprints: HashSet<Vec<u8>>,
    allow_anonymous: bool,
}

impl InMemoryClaimsResolver {
    /// Resolver that rejects everyone until users are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept anonymous requestors, issuing tokens without claims.
    #[must_use]
    pub fn allow_anonymous(mut self) -> Self {
        self.allow_anonymous = true;
        self
    }

    /// Accept `name` with the given group memberships.
    #[must_use]
    pub fn with_user(mut self, name: impl Into<String>, groups: &[&str]) -> Self {
        self.users.insert(name.into(), groups.iter().map(|g| (*g).to_string()).collect());
        self
    }

    /// Accept certificates with this thumbprint.
    #[must_use]
    pub fn with_certificate(mut self, thumbprint: impl Into<Vec<u8>>) -> Self {
        self.trusted_thumbprints.insert(thumbprint.into());
        self
    }
}

impl ClaimsResolver for InMemoryClaimsResolver {
    fn resolve(&self, evidence: &IdentityEvidence) -> Result<Vec<Claim>, NegotiationError> {
        match evidence {
            IdentityEvidence::Anonymous if self.allow_anonymous => Ok(Vec::new()),
            IdentityEvidence::Anonymous => Err(NegotiationError::AuthenticationFailed(
                "anonymous requestors are not accepted".to_string(),
            )),
            IdentityEvidence::UserName(name) if name.is_empty() => {
                Err(NegotiationError::MalformedCredential("empty user name".to_string()))
            },
            IdentityEvidence::UserName(name) => {
                let groups = self.users.get(name).ok_or_else(|| {
                    NegotiationError::AuthenticationFailed(format!("unknown user {name}"))
                })?;
                let mut claims = vec![Claim::identity(name.clone())];
                claims.extend(groups.iter().map(|group| Claim::property("group", group.clone())));
                Ok(claims)
            },
            IdentityEvidence::Certificate { subject, thumbprint } => {
                if subject.is_empty() || thumbprint.is_empty() {
                    return Err(NegotiationError::MalformedCredential(
                        "certificate without subject or thumbprint".to_string(),
                    ));
                }
                if !self.trusted_thumbprints.contains(thumbprint) {
                    return Err(NegotiationError::AuthenticationFailed(format!(
                        "untrusted certificate {subject}"
                    )));
                }
                Ok(vec![Claim::identity(subject.clone())])
            },
        }
    }
}

/// In-memory credential store.
///
/// Interior mutability lets credentials be provisioned while the issuer runs.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    credentials: Mutex<HashMap<String, SymmetricKey>>,
}

impl InMemoryCredentialStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision or replace a principal's credential.
    pub fn insert(&self, principal: impl Into<String>, credential: SymmetricKey) {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(principal.into(), credential);
    }

    /// Revoke a principal.
    pub fn remove(&self, principal: &str) -> bool {
        self.credentials.lock().unwrap_or_else(PoisonError::into_inner).remove(principal).is_some()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn lookup(&self, principal: &str) -> Option<SymmetricKey> {
        self.credentials.lock().unwrap_or_else(PoisonError::into_inner).get(principal).cloned()
    }
}
