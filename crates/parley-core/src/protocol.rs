//! Blob formats and proofs for the built-in negotiation protocols.
//!
//! Both peers share these definitions; each side's state machine lives in its
//! own crate.
//!
//! - Entropy exchange: one leg. Both sides contribute entropy and the session
//!   key is their combination.
//! - Challenge/response: two legs against a pre-shared principal credential,
//!   with mutual proofs. `Hello` → `Challenge`, then `Proof` → `Final`.
//! - Renewal: one leg. Fresh entropy from both sides is bound to the previous
//!   session key and the new key generation.

use parley_crypto::{
    CryptoError, PROOF_SIZE, SymmetricKey, combine_entropy, compute_proof, derive_bound_key,
    verify_proof,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    error::NegotiationError,
    message::{MessageId, decode_cbor, encode_cbor},
};

/// Entropy-exchange blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntropyBlob {
    /// Requestor's contribution
    Request {
        /// Requestor entropy
        entropy: Vec<u8>,
    },
    /// Issuer's contribution
    Response {
        /// Issuer entropy
        entropy: Vec<u8>,
    },
}

/// Challenge/response blobs, in leg order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeBlob {
    /// Leg 1 request: who is asking
    Hello {
        /// Principal name
        principal: String,
        /// Requestor nonce
        client_nonce: Vec<u8>,
    },
    /// Leg 1 reply: issuer nonce
    Challenge {
        /// Issuer nonce
        server_nonce: Vec<u8>,
    },
    /// Leg 2 request: proof of the credential plus key entropy
    Proof {
        /// HMAC under the principal credential
        proof: Vec<u8>,
        /// Requestor key entropy
        client_entropy: Vec<u8>,
    },
    /// Leg 2 reply: issuer entropy and its own proof
    Final {
        /// Issuer key entropy
        server_entropy: Vec<u8>,
        /// HMAC proving the issuer also holds the credential
        server_proof: Vec<u8>,
    },
}

/// Renewal blob, same shape both ways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewBlob {
    /// Fresh entropy from the sender
    pub entropy: Vec<u8>,
}

/// Encode a blob.
pub fn encode_blob<T: Serialize>(blob: &T) -> Result<Vec<u8>, NegotiationError> {
    Ok(encode_cbor(blob)?)
}

/// Decode a blob. Undecodable input is a protocol violation.
pub fn decode_blob<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, NegotiationError> {
    decode_cbor(bytes)
        .map_err(|e| NegotiationError::ProtocolViolation(format!("bad negotiation blob: {e}")))
}

const CLIENT_PROOF_LABEL: &[u8] = b"parley challenge client";
const SERVER_PROOF_LABEL: &[u8] = b"parley challenge server";
const POSSESSION_LABEL: &[u8] = b"parley possession";

/// Inputs both sides bind into challenge proofs.
#[derive(Debug, Clone, Copy)]
pub struct ChallengeTranscript<'a> {
    /// Negotiation context
    pub context: &'a str,
    /// Requestor nonce
    pub client_nonce: &'a [u8],
    /// Issuer nonce
    pub server_nonce: &'a [u8],
    /// Requestor key entropy
    pub client_entropy: &'a [u8],
}

impl ChallengeTranscript<'_> {
    /// Requestor's proof of the credential.
    pub fn client_proof(&self, credential: &SymmetricKey) -> [u8; PROOF_SIZE] {
        compute_proof(credential, &[
            CLIENT_PROOF_LABEL,
            self.context.as_bytes(),
            self.client_nonce,
            self.server_nonce,
            self.client_entropy,
        ])
    }

    /// Verify the requestor's proof.
    pub fn verify_client_proof(
        &self,
        credential: &SymmetricKey,
        proof: &[u8],
    ) -> Result<(), CryptoError> {
        verify_proof(
            credential,
            &[
                CLIENT_PROOF_LABEL,
                self.context.as_bytes(),
                self.client_nonce,
                self.server_nonce,
                self.client_entropy,
            ],
            proof,
        )
    }

    /// Issuer's proof, additionally bound to its own entropy.
    pub fn server_proof(
        &self,
        credential: &SymmetricKey,
        server_entropy: &[u8],
    ) -> [u8; PROOF_SIZE] {
        compute_proof(credential, &[
            SERVER_PROOF_LABEL,
            self.context.as_bytes(),
            self.client_nonce,
            self.server_nonce,
            self.client_entropy,
            server_entropy,
        ])
    }

    /// Verify the issuer's proof.
    pub fn verify_server_proof(
        &self,
        credential: &SymmetricKey,
        server_entropy: &[u8],
        proof: &[u8],
    ) -> Result<(), CryptoError> {
        verify_proof(
            credential,
            &[
                SERVER_PROOF_LABEL,
                self.context.as_bytes(),
                self.client_nonce,
                self.server_nonce,
                self.client_entropy,
                server_entropy,
            ],
            proof,
        )
    }

    /// Session key for a completed challenge negotiation.
    pub fn session_key(
        &self,
        credential: &SymmetricKey,
        server_entropy: &[u8],
        key_bits: usize,
    ) -> Result<SymmetricKey, CryptoError> {
        derive_bound_key(credential, self.client_entropy, server_entropy, self.context, key_bits)
    }
}

/// Session key for a completed entropy exchange.
pub fn entropy_session_key(
    client_entropy: &[u8],
    server_entropy: &[u8],
    key_bits: usize,
) -> Result<SymmetricKey, CryptoError> {
    combine_entropy(client_entropy, server_entropy, key_bits)
}

/// Key for a renewed token, bound to the previous key and new generation.
pub fn renewed_session_key(
    previous: &SymmetricKey,
    client_entropy: &[u8],
    server_entropy: &[u8],
    new_generation: &str,
    key_bits: usize,
) -> Result<SymmetricKey, CryptoError> {
    derive_bound_key(previous, client_entropy, server_entropy, new_generation, key_bits)
}

/// Proof of possession of a token key, bound to one request.
pub fn possession_proof(key: &SymmetricKey, message_id: MessageId) -> [u8; PROOF_SIZE] {
    compute_proof(key, &[POSSESSION_LABEL, &message_id.to_bytes()])
}

/// Verify a proof of possession.
pub fn verify_possession(
    key: &SymmetricKey,
    message_id: MessageId,
    proof: &[u8],
) -> Result<(), CryptoError> {
    verify_proof(key, &[POSSESSION_LABEL, &message_id.to_bytes()], proof)
}
