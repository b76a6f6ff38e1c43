//! Cookie-mode token state.
//!
//! The full token, key included, is sealed with the issuer's state key so the
//! issuer needs no cache entry to recognise it later.

use std::time::SystemTime;

use parley_core::{
    Claim, NegotiationError, SessionToken,
    message::{decode_cbor, encode_cbor},
};
use parley_crypto::{COOKIE_NONCE_SIZE, SecurityStateEncoder, SymmetricKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

#[derive(Serialize, Deserialize)]
struct CookieState {
    context_id: String,
    key_generation: String,
    key: Vec<u8>,
    valid_from: SystemTime,
    valid_to: SystemTime,
    claims: Vec<Claim>,
}

impl Drop for CookieState {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Seal `token` into a cookie.
pub(crate) fn seal(
    encoder: &dyn SecurityStateEncoder,
    token: &SessionToken,
    nonce: [u8; COOKIE_NONCE_SIZE],
) -> Result<Vec<u8>, NegotiationError> {
    let state = CookieState {
        context_id: token.context_id().to_string(),
        key_generation: token.key_generation().to_string(),
        key: token.key().as_bytes().to_vec(),
        valid_from: token.valid_from(),
        valid_to: token.valid_to(),
        claims: token.claims().to_vec(),
    };
    let mut plaintext = encode_cbor(&state)?;
    let cookie = encoder.encode(&plaintext, nonce);
    plaintext.zeroize();
    Ok(cookie)
}

/// Open a cookie back into the token it carries.
///
/// # Errors
///
/// `BadContextToken` if the cookie was not produced by this issuer's key or
/// does not decode.
pub(crate) fn open(
    encoder: &dyn SecurityStateEncoder,
    cookie: &[u8],
) -> Result<SessionToken, NegotiationError> {
    let mut plaintext = encoder.decode(cookie)?;
    let decoded = decode_cbor::<CookieState>(&plaintext);
    plaintext.zeroize();
    let state = decoded
        .map_err(|e| NegotiationError::BadContextToken(format!("undecodable cookie: {e}")))?;

    let token = SessionToken::new(
        state.context_id.clone(),
        state.key_generation.clone(),
        SymmetricKey::from_slice(&state.key),
        state.valid_from,
        state.valid_to,
        state.claims.clone(),
    )?;
    Ok(token.with_cookie(cookie.to_vec()))
}
