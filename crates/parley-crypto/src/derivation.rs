//! Session key derivation using HKDF

use hkdf::Hkdf;
use sha2::Sha256;

use crate::{error::CryptoError, key::SymmetricKey};

/// Label used when combining requestor and issuer entropy
const COMBINED_KEY_LABEL: &[u8] = b"parleyCombinedKeyV1";

/// Label used when deriving a key bound to an existing secret
const BOUND_KEY_LABEL: &[u8] = b"parleyBoundKeyV1";

/// Largest key HKDF-SHA256 can expand to (255 * 32 bytes)
const MAX_OUTPUT_BYTES: usize = 255 * 32;

/// Combine requestor and issuer entropy into a session key.
///
/// Both peers run this with the same inputs and get the same key, so the key
/// itself never crosses the wire.
///
/// # Security
///
/// - Either side's entropy alone cannot predict the key
/// - Inputs are length-prefixed, so `(ab, c)` and `(a, bc)` differ
/// - Deterministic: same inputs always produce same output
pub fn combine_entropy(
    requestor: &[u8],
    issuer: &[u8],
    key_bits: usize,
) -> Result<SymmetricKey, CryptoError> {
    let mut ikm = Vec::with_capacity(16 + requestor.len() + issuer.len());
    ikm.extend_from_slice(&(requestor.len() as u64).to_be_bytes());
    ikm.extend_from_slice(requestor);
    ikm.extend_from_slice(&(issuer.len() as u64).to_be_bytes());
    ikm.extend_from_slice(issuer);

    let key = expand(None, &ikm, COMBINED_KEY_LABEL, key_bits);
    zeroize::Zeroize::zeroize(&mut ikm);
    key
}

/// Derive a session key bound to a secret both peers already share.
///
/// The secret acts as the HKDF salt, so the result can only be computed by
/// someone who holds it: renewal binds to the previous session key and the
/// new key-generation id, challenge negotiation binds to the principal's
/// credential and the negotiation context.
pub fn derive_bound_key(
    secret: &SymmetricKey,
    requestor: &[u8],
    issuer: &[u8],
    binding: &str,
    key_bits: usize,
) -> Result<SymmetricKey, CryptoError> {
    let mut ikm = Vec::with_capacity(16 + requestor.len() + issuer.len());
    ikm.extend_from_slice(&(requestor.len() as u64).to_be_bytes());
    ikm.extend_from_slice(requestor);
    ikm.extend_from_slice(&(issuer.len() as u64).to_be_bytes());
    ikm.extend_from_slice(issuer);

    let mut info = Vec::with_capacity(BOUND_KEY_LABEL.len() + binding.len());
    info.extend_from_slice(BOUND_KEY_LABEL);
    info.extend_from_slice(binding.as_bytes());

    let key = expand(Some(secret.as_bytes()), &ikm, &info, key_bits);
    zeroize::Zeroize::zeroize(&mut ikm);
    key
}

fn expand(
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    key_bits: usize,
) -> Result<SymmetricKey, CryptoError> {
    if key_bits == 0 || key_bits % 8 != 0 || key_bits / 8 > MAX_OUTPUT_BYTES {
        return Err(CryptoError::InvalidKeyLength { bits: key_bits });
    }

    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = vec![0u8; key_bits / 8];
    let Ok(()) = hkdf.expand(info, &mut okm) else {
        unreachable!("output length checked against the HKDF-SHA256 limit");
    };

    Ok(SymmetricKey::from_bytes(okm))
}
