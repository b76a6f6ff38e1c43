//! Proofs of possession using HMAC-SHA256.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{error::CryptoError, key::SymmetricKey};

type HmacSha256 = Hmac<Sha256>;

/// Size in bytes of a proof.
pub const PROOF_SIZE: usize = 32;

/// Compute an HMAC-SHA256 proof over the concatenation of `parts`.
///
/// Each part is length-prefixed so callers can pass structured fields
/// without worrying about ambiguous concatenation.
pub fn compute_proof(key: &SymmetricKey, parts: &[&[u8]]) -> [u8; PROOF_SIZE] {
    let mac = keyed_mac(key, parts);
    mac.finalize().into_bytes().into()
}

/// Verify a proof in constant time.
pub fn verify_proof(key: &SymmetricKey, parts: &[&[u8]], proof: &[u8]) -> Result<(), CryptoError> {
    keyed_mac(key, parts).verify_slice(proof).map_err(|_| CryptoError::ProofMismatch)
}

fn keyed_mac(key: &SymmetricKey, parts: &[&[u8]]) -> HmacSha256 {
    let Ok(mut mac) = HmacSha256::new_from_slice(key.as_bytes()) else {
        unreachable!("HMAC accepts keys of any length");
    };
    for part in parts {
        mac.update(&(part.len() as u64).to_be_bytes());
        mac.update(part);
    }
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_verifies_with_same_key() {
        let key = SymmetricKey::from_slice(&[9u8; 32]);
        let proof = compute_proof(&key, &[b"context", b"message"]);
        assert!(verify_proof(&key, &[b"context", b"message"], &proof).is_ok());
    }

    #[test]
    fn proof_fails_with_other_key_or_input() {
        let key = SymmetricKey::from_slice(&[9u8; 32]);
        let other = SymmetricKey::from_slice(&[8u8; 32]);
        let proof = compute_proof(&key, &[b"context", b"message"]);

        assert_eq!(
            verify_proof(&other, &[b"context", b"message"], &proof),
            Err(CryptoError::ProofMismatch)
        );
        assert_eq!(
            verify_proof(&key, &[b"contextm", b"essage"], &proof),
            Err(CryptoError::ProofMismatch)
        );
    }

    #[test]
    fn truncated_proof_fails() {
        let key = SymmetricKey::from_slice(&[9u8; 32]);
        let proof = compute_proof(&key, &[b"x"]);
        assert!(verify_proof(&key, &[b"x"], &proof[..16]).is_err());
    }
}
