//! Signature confirmation correlation.
//!
//! When securing a request, every signature value produced is recorded. The
//! reply must echo those values back as confirmations, and the receiver
//! checks that the echo is exactly the set it sent: same bytes, same
//! encrypted flag, one confirmation per signature.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{error::NegotiationError, token::SessionToken};

/// One signature value and whether it travelled encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureValue {
    /// Raw signature bytes
    pub value: Vec<u8>,
    /// Whether the value was encrypted on the wire
    pub encrypted: bool,
}

impl SignatureValue {
    /// Build a signature value.
    pub fn new(value: impl Into<Vec<u8>>, encrypted: bool) -> Self {
        Self { value: value.into(), encrypted }
    }
}

/// Ordered collection of signature values or confirmations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureConfirmations {
    values: Vec<SignatureValue>,
}

impl SignatureConfirmations {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value.
    pub fn push(&mut self, value: impl Into<Vec<u8>>, encrypted: bool) {
        self.values.push(SignatureValue::new(value, encrypted));
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate values in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SignatureValue> {
        self.values.iter()
    }
}

impl FromIterator<SignatureValue> for SignatureConfirmations {
    fn from_iter<I: IntoIterator<Item = SignatureValue>>(iter: I) -> Self {
        Self { values: iter.into_iter().collect() }
    }
}

/// Collects signatures while an outgoing message is secured.
#[derive(Debug, Default)]
pub struct OutgoingSignatures {
    sent: SignatureConfirmations,
}

impl OutgoingSignatures {
    /// Nothing recorded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a signature placed on the outgoing message.
    pub fn record(&mut self, value: impl Into<Vec<u8>>, encrypted: bool) {
        self.sent.push(value, encrypted);
    }

    /// Finish securing: hand the recorded set to the matching verify step.
    pub fn into_correlation_state(self, token: Option<Arc<SessionToken>>) -> CorrelationState {
        let sent = if self.sent.is_empty() { None } else { Some(self.sent) };
        CorrelationState { token, sent }
    }
}

/// Handle passed from securing a request to verifying its reply.
#[derive(Debug, Clone, Default)]
pub struct CorrelationState {
    token: Option<Arc<SessionToken>>,
    sent: Option<SignatureConfirmations>,
}

impl CorrelationState {
    /// Correlation state carrying only the protecting token.
    pub fn for_token(token: Arc<SessionToken>) -> Self {
        Self { token: Some(token), sent: None }
    }

    /// Token that protected the request.
    pub fn token(&self) -> Option<&Arc<SessionToken>> {
        self.token.as_ref()
    }

    /// Signatures the request carried, if any.
    pub fn sent_signatures(&self) -> Option<&SignatureConfirmations> {
        self.sent.as_ref()
    }
}

/// Verifies reply confirmations against the signatures a request carried.
pub struct SignatureConfirmationCorrelator;

impl SignatureConfirmationCorrelator {
    /// Check that `received` is exactly the set of signatures recorded in
    /// `state`.
    ///
    /// Matching is pairwise with a used-bitmap so one confirmation can never
    /// satisfy two signatures. Quadratic in the number of signatures, which
    /// is a handful per message.
    ///
    /// # Errors
    ///
    /// - `UnexpectedConfirmations` if nothing was sent but confirmations
    ///   arrived
    /// - `ConfirmationMismatch` if counts differ or a sent signature has no
    ///   matching confirmation
    pub fn verify(
        state: &CorrelationState,
        received: &SignatureConfirmations,
    ) -> Result<(), NegotiationError> {
        let Some(sent) = state.sent.as_ref().filter(|sent| !sent.is_empty()) else {
            if received.is_empty() {
                return Ok(());
            }
            return Err(NegotiationError::UnexpectedConfirmations { count: received.len() });
        };

        if sent.len() != received.len() {
            return Err(NegotiationError::ConfirmationMismatch(format!(
                "sent {} signatures, received {} confirmations",
                sent.len(),
                received.len()
            )));
        }

        let mut used = vec![false; received.len()];
        for (index, signature) in sent.iter().enumerate() {
            let matched = received
                .iter()
                .zip(&used)
                .position(|(confirmation, taken)| !*taken && confirmation == signature);

            match matched {
                Some(slot) => used[slot] = true,
                None => {
                    return Err(NegotiationError::ConfirmationMismatch(format!(
                        "signature {index} (encrypted: {}) has no matching confirmation",
                        signature.encrypted
                    )));
                },
            }
        }

        Ok(())
    }
}

/// The single token referenced by a set of correlation states.
///
/// # Errors
///
/// `MultipleCorrelationTokens` if two states reference different tokens.
pub fn token_from_correlation_states(
    states: &[Option<CorrelationState>],
) -> Result<Option<Arc<SessionToken>>, NegotiationError> {
    let mut found: Option<&Arc<SessionToken>> = None;

    for token in states.iter().flatten().filter_map(CorrelationState::token) {
        match found {
            Some(existing) if !Arc::ptr_eq(existing, token) && **existing != **token => {
                return Err(NegotiationError::MultipleCorrelationTokens);
            },
            Some(_) => {},
            None => found = Some(token),
        }
    }

    Ok(found.cloned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use parley_crypto::SymmetricKey;

    use super::*;

    fn sent(values: &[(&[u8], bool)]) -> CorrelationState {
        let mut outgoing = OutgoingSignatures::new();
        for (value, encrypted) in values {
            outgoing.record(value.to_vec(), *encrypted);
        }
        outgoing.into_correlation_state(None)
    }

    fn received(values: &[(&[u8], bool)]) -> SignatureConfirmations {
        values
            .iter()
            .map(|(value, encrypted)| SignatureValue::new(value.to_vec(), *encrypted))
            .collect()
    }

    fn token(generation: &str) -> Arc<SessionToken> {
        Arc::new(
            SessionToken::new(
                "urn:ctx",
                generation,
                SymmetricKey::from_slice(&[5u8; 16]),
                UNIX_EPOCH,
                UNIX_EPOCH + Duration::from_secs(1),
                vec![],
            )
            .unwrap(),
        )
    }

    #[test]
    fn permutation_matches() {
        let state = sent(&[(b"sig1", false), (b"sig2", true)]);
        let reply = received(&[(b"sig2", true), (b"sig1", false)]);

        assert!(SignatureConfirmationCorrelator::verify(&state, &reply).is_ok());
    }

    #[test]
    fn flag_mismatch_fails() {
        let state = sent(&[(b"sig1", false), (b"sig2", true)]);
        let reply = received(&[(b"sig1", true), (b"sig2", true)]);

        assert!(matches!(
            SignatureConfirmationCorrelator::verify(&state, &reply),
            Err(NegotiationError::ConfirmationMismatch(_))
        ));
    }

    #[test]
    fn one_confirmation_cannot_match_twice() {
        let state = sent(&[(b"same", false), (b"same", false)]);
        let reply = received(&[(b"same", false), (b"other", false)]);

        assert!(matches!(
            SignatureConfirmationCorrelator::verify(&state, &reply),
            Err(NegotiationError::ConfirmationMismatch(_))
        ));
    }

    #[test]
    fn count_difference_fails() {
        let state = sent(&[(b"a", false)]);
        let reply = received(&[(b"a", false), (b"b", false)]);

        assert!(matches!(
            SignatureConfirmationCorrelator::verify(&state, &reply),
            Err(NegotiationError::ConfirmationMismatch(_))
        ));
        assert!(SignatureConfirmationCorrelator::verify(&state, &received(&[])).is_err());
    }

    #[test]
    fn confirmations_without_signatures_are_unexpected() {
        let state = sent(&[]);

        assert_eq!(
            SignatureConfirmationCorrelator::verify(&state, &received(&[(b"x", false)])),
            Err(NegotiationError::UnexpectedConfirmations { count: 1 })
        );
        assert!(SignatureConfirmationCorrelator::verify(&state, &received(&[])).is_ok());
    }

    #[test]
    fn single_token_extracted() {
        let shared = token("g1");
        let states = vec![
            None,
            Some(CorrelationState::for_token(Arc::clone(&shared))),
            Some(CorrelationState::default()),
            Some(CorrelationState::for_token(Arc::clone(&shared))),
        ];

        let found = token_from_correlation_states(&states).unwrap().unwrap();
        assert!(Arc::ptr_eq(&found, &shared));
        assert_eq!(token_from_correlation_states(&[None]).unwrap(), None);
    }

    #[test]
    fn distinct_tokens_rejected() {
        let states = vec![
            Some(CorrelationState::for_token(token("g1"))),
            Some(CorrelationState::for_token(token("g2"))),
        ];

        assert_eq!(
            token_from_correlation_states(&states),
            Err(NegotiationError::MultipleCorrelationTokens)
        );
    }
}
