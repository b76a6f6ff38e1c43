//! Symmetric key material.

use std::fmt;

use zeroize::Zeroizing;

/// Size in bytes of a single entropy contribution.
pub const ENTROPY_SIZE: usize = 32;

/// Symmetric key bytes, zeroized when dropped.
///
/// `Debug` prints only the key length. Equality compares contents, which is
/// fine for tests and caches but must not be used to verify proofs (use
/// [`crate::verify_proof`] for that).
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey(Zeroizing<Vec<u8>>);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Copy key bytes out of a slice.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes.to_vec())
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a zero-length key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key length in bits.
    pub fn bits(&self) -> usize {
        self.0.len() * 8
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey({} bits)", self.bits())
    }
}

/// Produce an entropy contribution from caller-supplied randomness.
///
/// The crate never touches an RNG itself; the caller's environment fills the
/// buffer so simulations stay reproducible.
pub fn generate_entropy(random_bytes: [u8; ENTROPY_SIZE]) -> SymmetricKey {
    SymmetricKey::from_bytes(random_bytes.to_vec())
}
