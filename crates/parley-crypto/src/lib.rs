//! Parley Cryptographic Primitives
//!
//! Cryptographic building blocks for session negotiation. Pure functions with
//! deterministic outputs. Callers provide random bytes for deterministic
//! testing.
//!
//! # Key Lifecycle
//!
//! A session key is never transmitted. Both peers contribute entropy during
//! negotiation and derive the same key locally; renewal mixes the previous
//! key with fresh entropy from both sides so every key generation is
//! independent of the wire.
//!
//! ```text
//! Requestor Entropy ─┐
//!                    ├─ HKDF → Session Key (generation 0)
//! Issuer Entropy ────┘            │
//!                                 ▼
//!            Renew: HKDF(previous key, fresh entropy) → generation n+1
//! ```
//!
//! # Security
//!
//! - Key material lives in [`SymmetricKey`], which is zeroized on drop and
//!   never printed by `Debug`
//! - Proofs of possession are HMAC-SHA256 and verified in constant time
//! - Cookies (self-contained session state) are sealed with
//!   XChaCha20-Poly1305 so the client cannot read or alter them

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cookie;
mod derivation;
mod error;
mod key;
mod proof;
mod suite;

pub use cookie::{AeadStateEncoder, COOKIE_NONCE_SIZE, SecurityStateEncoder};
pub use derivation::{combine_entropy, derive_bound_key};
pub use error::CryptoError;
pub use key::{ENTROPY_SIZE, SymmetricKey, generate_entropy};
pub use proof::{PROOF_SIZE, compute_proof, verify_proof};
pub use suite::AlgorithmSuite;
