//! Property-based tests for signature confirmation matching

use parley_core::{
    NegotiationError, OutgoingSignatures, SignatureConfirmationCorrelator, SignatureConfirmations,
    SignatureValue,
};
use proptest::{prelude::*, sample::Index};

fn signatures() -> impl Strategy<Value = Vec<(Vec<u8>, bool)>> {
    prop::collection::vec((prop::collection::vec(any::<u8>(), 1..16), any::<bool>()), 1..8)
}

fn correlate(
    sent: &[(Vec<u8>, bool)],
    received: &[(Vec<u8>, bool)],
) -> Result<(), NegotiationError> {
    let mut outgoing = OutgoingSignatures::new();
    for (value, encrypted) in sent {
        outgoing.record(value.clone(), *encrypted);
    }
    let state = outgoing.into_correlation_state(None);
    let received: SignatureConfirmations = received
        .iter()
        .map(|(value, encrypted)| SignatureValue::new(value.clone(), *encrypted))
        .collect();
    SignatureConfirmationCorrelator::verify(&state, &received)
}

/// Property: any permutation of the sent signatures is accepted
#[test]
fn prop_permutation_accepted() {
    proptest!(|(sent in signatures(), seed in any::<u64>())| {
        let mut received = sent.clone();
        let len = received.len();
        let mut state = seed;
        for i in (1..len).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state >> 33) as usize % (i + 1);
            received.swap(i, j);
        }

        prop_assert!(correlate(&sent, &received).is_ok());
    });
}

/// Property: flipping one encrypted flag is rejected
#[test]
fn prop_flag_flip_rejected() {
    proptest!(|(sent in signatures(), index in any::<Index>())| {
        let mut received = sent.clone();
        let i = index.index(received.len());
        received[i].1 = !received[i].1;

        // The flipped value may coincide with another sent entry; only assert
        // when the multiset actually changed.
        let mut a = sent.clone();
        let mut b = received.clone();
        a.sort();
        b.sort();
        prop_assume!(a != b);

        prop_assert!(matches!(
            correlate(&sent, &received),
            Err(NegotiationError::ConfirmationMismatch(_))
        ));
    });
}

/// Property: a missing or extra confirmation is rejected
#[test]
fn prop_count_change_rejected() {
    proptest!(|(sent in signatures(), extra in prop::collection::vec(any::<u8>(), 1..16))| {
        let mut missing = sent.clone();
        missing.pop();
        prop_assert!(matches!(
            correlate(&sent, &missing),
            Err(NegotiationError::ConfirmationMismatch(_))
        ));

        let mut padded = sent.clone();
        padded.push((extra, false));
        prop_assert!(matches!(
            correlate(&sent, &padded),
            Err(NegotiationError::ConfirmationMismatch(_))
        ));
    });
}

/// Property: confirmations with nothing sent are unexpected
#[test]
fn prop_unsolicited_confirmations_rejected() {
    proptest!(|(received in signatures())| {
        let result = correlate(&[], &received);
        let count = received.len();
        prop_assert_eq!(result, Err(NegotiationError::UnexpectedConfirmations { count }));
    });
}
