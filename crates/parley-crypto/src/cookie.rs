//! Cookie sealing for self-contained session tokens.
//!
//! In cookie mode the issuer keeps no per-session state: the full token state
//! is sealed into an opaque cookie that the client presents back. Only the
//! issuer's state key can open it.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::{error::CryptoError, key::SymmetricKey};

/// Size of the random nonce prefixed to every cookie (24 bytes)
pub const COOKIE_NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
const POLY1305_TAG_SIZE: usize = 16;

/// Encodes server-side session state into opaque cookies and back.
///
/// Implementations must authenticate the cookie; a modified cookie must fail
/// to decode rather than yield altered state.
pub trait SecurityStateEncoder: Send + Sync {
    /// Seal `state` into a cookie. `nonce` must be fresh random bytes.
    fn encode(&self, state: &[u8], nonce: [u8; COOKIE_NONCE_SIZE]) -> Vec<u8>;

    /// Open a cookie produced by [`Self::encode`].
    fn decode(&self, cookie: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// `XChaCha20-Poly1305` cookie encoder.
///
/// Cookie layout: `nonce (24) || ciphertext || tag (16)`.
pub struct AeadStateEncoder {
    cipher: XChaCha20Poly1305,
}

impl AeadStateEncoder {
    /// Create an encoder from a 256-bit state key.
    pub fn new(state_key: &SymmetricKey) -> Result<Self, CryptoError> {
        if state_key.len() != 32 {
            return Err(CryptoError::InvalidKeyLength { bits: state_key.bits() });
        }
        let cipher = XChaCha20Poly1305::new_from_slice(state_key.as_bytes())
            .map_err(|_| CryptoError::InvalidKeyLength { bits: state_key.bits() })?;
        Ok(Self { cipher })
    }
}

impl SecurityStateEncoder for AeadStateEncoder {
    fn encode(&self, state: &[u8], nonce: [u8; COOKIE_NONCE_SIZE]) -> Vec<u8> {
        let Ok(ciphertext) = self.cipher.encrypt(XNonce::from_slice(&nonce), state) else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        let mut cookie = Vec::with_capacity(COOKIE_NONCE_SIZE + ciphertext.len());
        cookie.extend_from_slice(&nonce);
        cookie.extend_from_slice(&ciphertext);
        cookie
    }

    fn decode(&self, cookie: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if cookie.len() < COOKIE_NONCE_SIZE + POLY1305_TAG_SIZE {
            return Err(CryptoError::InvalidCookie {
                reason: format!("cookie too short: {} bytes", cookie.len()),
            });
        }

        let (nonce, ciphertext) = cookie.split_at(COOKIE_NONCE_SIZE);
        self.cipher.decrypt(XNonce::from_slice(nonce), ciphertext).map_err(|_| {
            CryptoError::InvalidCookie { reason: "authentication failed".to_string() }
        })
    }
}
