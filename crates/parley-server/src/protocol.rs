//! Server halves of the built-in negotiation protocols.
//!
//! The authenticator owns state lifecycle, token issuance and replies; a
//! protocol only turns request blobs into reply blobs and, on its last leg,
//! the negotiated key plus claims.

use parley_core::{
    Claim, Environment, NegotiationError, NegotiationPayload, RequestEnvelope,
    protocol::{
        ChallengeBlob, ChallengeTranscript, EntropyBlob, decode_blob, encode_blob,
        entropy_session_key,
    },
};
use parley_crypto::{ENTROPY_SIZE, SymmetricKey};

use crate::claims::{ClaimsResolver, CredentialStore};

/// Nonce size for challenge negotiation.
pub const NONCE_SIZE: usize = 32;

/// Result of a negotiation leg.
#[derive(Debug)]
pub struct LegOutcome {
    /// Reply blob
    pub blob: Vec<u8>,
    /// Present when this leg finished the negotiation
    pub completion: Option<Completion>,
}

/// Material for the token a finished negotiation produces.
#[derive(Debug)]
pub struct Completion {
    /// Negotiated session key
    pub key: SymmetricKey,
    /// Claims for the issued token
    pub claims: Vec<Claim>,
}

/// Server side of a negotiation protocol.
pub trait ServerNegotiationProtocol: Send + Sync + 'static {
    /// Per-negotiation state kept between legs.
    type Payload: NegotiationPayload + 'static;

    /// Protocol name for logs.
    fn name(&self) -> &'static str;

    /// Handle the first leg, creating the payload.
    fn process_first_leg<E: Environment>(
        &self,
        env: &E,
        request: &RequestEnvelope,
        context: &str,
        key_bits: usize,
    ) -> Result<(Self::Payload, LegOutcome), NegotiationError>;

    /// Handle a continuation leg.
    fn process_next_leg<E: Environment>(
        &self,
        env: &E,
        request: &RequestEnvelope,
        context: &str,
        payload: &mut Self::Payload,
        key_bits: usize,
    ) -> Result<LegOutcome, NegotiationError>;
}

/// Entropy exchange payload. The exchange finishes on its first leg, so
/// there is nothing to keep.
#[derive(Debug, Default)]
pub struct EntropyPayload;

impl NegotiationPayload for EntropyPayload {}

/// Single-leg WS-Trust issuance: both sides contribute entropy, identity comes
/// from the request's evidence.
pub struct EntropyExchange<R> {
    resolver: R,
}

impl<R: ClaimsResolver> EntropyExchange<R> {
    /// Protocol resolving identities with `resolver`.
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }
}

impl<R: ClaimsResolver + 'static> ServerNegotiationProtocol for EntropyExchange<R> {
    type Payload = EntropyPayload;

    fn name(&self) -> &'static str {
        "entropy-exchange"
    }

    fn process_first_leg<E: Environment>(
        &self,
        env: &E,
        request: &RequestEnvelope,
        _context: &str,
        key_bits: usize,
    ) -> Result<(Self::Payload, LegOutcome), NegotiationError> {
        let EntropyBlob::Request { entropy: client_entropy } = decode_blob(&request.blob)? else {
            return Err(NegotiationError::ProtocolViolation(
                "expected entropy request".to_string(),
            ));
        };
        if client_entropy.len() < ENTROPY_SIZE / 2 {
            return Err(NegotiationError::ProtocolViolation(format!(
                "requestor entropy too short: {} bytes",
                client_entropy.len()
            )));
        }

        let claims = self.resolver.resolve(&request.evidence)?;
        let server_entropy = env.random_array::<ENTROPY_SIZE>();
        let key = entropy_session_key(&client_entropy, &server_entropy, key_bits)?;

        let blob = encode_blob(&EntropyBlob::Response { entropy: server_entropy.to_vec() })?;
        Ok((EntropyPayload, LegOutcome { blob, completion: Some(Completion { key, claims }) }))
    }

    fn process_next_leg<E: Environment>(
        &self,
        _env: &E,
        _request: &RequestEnvelope,
        _context: &str,
        _payload: &mut Self::Payload,
        _key_bits: usize,
    ) -> Result<LegOutcome, NegotiationError> {
        Err(NegotiationError::ProtocolViolation(
            "entropy exchange has no continuation leg".to_string(),
        ))
    }
}

/// Challenge negotiation payload kept between the two legs.
#[derive(Debug, Default)]
pub struct ChallengePayload {
    principal: String,
    credential: Option<SymmetricKey>,
    client_nonce: Vec<u8>,
    server_nonce: Vec<u8>,
}

impl NegotiationPayload for ChallengePayload {
    fn dispose(&mut self) {
        self.credential = None;
        self.client_nonce.clear();
        self.server_nonce.clear();
    }
}

/// Two-leg challenge/response against a pre-shared credential, with mutual
/// proofs.
pub struct ChallengeResponse<C> {
    credentials: C,
}

impl<C: CredentialStore> ChallengeResponse<C> {
    /// Protocol verifying principals against `credentials`.
    pub fn new(credentials: C) -> Self {
        Self { credentials }
    }
}

impl<C: CredentialStore + 'static> ServerNegotiationProtocol for ChallengeResponse<C> {
    type Payload = ChallengePayload;

    fn name(&self) -> &'static str {
        "challenge-response"
    }

    fn process_first_leg<E: Environment>(
        &self,
        env: &E,
        request: &RequestEnvelope,
        _context: &str,
        _key_bits: usize,
    ) -> Result<(Self::Payload, LegOutcome), NegotiationError> {
        let ChallengeBlob::Hello { principal, client_nonce } = decode_blob(&request.blob)? else {
            return Err(NegotiationError::ProtocolViolation("expected hello".to_string()));
        };
        if client_nonce.len() != NONCE_SIZE {
            return Err(NegotiationError::MalformedCredential(format!(
                "client nonce must be {NONCE_SIZE} bytes"
            )));
        }

        let credential = self.credentials.lookup(&principal).ok_or_else(|| {
            NegotiationError::AuthenticationFailed(format!("unknown principal {principal}"))
        })?;
        let server_nonce = env.random_array::<NONCE_SIZE>().to_vec();

        let blob = encode_blob(&ChallengeBlob::Challenge { server_nonce: server_nonce.clone() })?;
        let payload = ChallengePayload {
            principal,
            credential: Some(credential),
            client_nonce,
            server_nonce,
        };
        Ok((payload, LegOutcome { blob, completion: None }))
    }

    fn process_next_leg<E: Environment>(
        &self,
        env: &E,
        request: &RequestEnvelope,
        context: &str,
        payload: &mut Self::Payload,
        key_bits: usize,
    ) -> Result<LegOutcome, NegotiationError> {
        let ChallengeBlob::Proof { proof, client_entropy } = decode_blob(&request.blob)? else {
            return Err(NegotiationError::ProtocolViolation("expected proof".to_string()));
        };
        let credential = payload.credential.take().ok_or_else(|| {
            NegotiationError::ProtocolViolation("challenge already answered".to_string())
        })?;

        let transcript = ChallengeTranscript {
            context,
            client_nonce: &payload.client_nonce,
            server_nonce: &payload.server_nonce,
            client_entropy: &client_entropy,
        };
        transcript.verify_client_proof(&credential, &proof)?;

        let server_entropy = env.random_array::<ENTROPY_SIZE>();
        let server_proof = transcript.server_proof(&credential, &server_entropy);
        let key = transcript.session_key(&credential, &server_entropy, key_bits)?;

        let blob = encode_blob(&ChallengeBlob::Final {
            server_entropy: server_entropy.to_vec(),
            server_proof: server_proof.to_vec(),
        })?;
        let claims = vec![Claim::identity(payload.principal.clone())];
        Ok(LegOutcome { blob, completion: Some(Completion { key, claims }) })
    }
}
