//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors produced by the crypto provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key size is outside what the algorithm suite accepts
    #[error("key size {bits} bits outside accepted range [{min}, {max}]")]
    KeySizeInvalid {
        /// Offered key size in bits
        bits: usize,
        /// Smallest accepted key size in bits
        min: usize,
        /// Largest accepted key size in bits
        max: usize,
    },

    /// Requested derivation length is not a whole number of bytes or is zero
    #[error("invalid key length: {bits} bits")]
    InvalidKeyLength {
        /// Requested length in bits
        bits: usize,
    },

    /// Proof of possession did not verify
    #[error("proof of possession mismatch")]
    ProofMismatch,

    /// Cookie could not be opened (tampered, truncated or wrong key)
    #[error("invalid cookie: {reason}")]
    InvalidCookie {
        /// What went wrong
        reason: String,
    },
}
