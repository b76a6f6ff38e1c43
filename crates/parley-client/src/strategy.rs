//! Client halves of the negotiation protocols.
//!
//! A [`NegotiationStrategy`] creates a fresh [`ClientNegotiationState`] per
//! negotiation. The driver feeds each reply back into the state and sends
//! whatever request the state produces next, until the state reports
//! completion and yields its token.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{
    CorrelationState, Environment, IdentityEvidence, IssuedToken, MessageId, NegotiationError,
    OutgoingSignatures, ReplyEnvelope, RequestAction, RequestEnvelope,
    SignatureConfirmationCorrelator, SessionToken, TokenReference,
    protocol::{
        ChallengeBlob, ChallengeTranscript, EntropyBlob, RenewBlob, decode_blob, encode_blob,
        entropy_session_key, possession_proof, renewed_session_key,
    },
};
use parley_crypto::{ENTROPY_SIZE, SymmetricKey};

/// Size of the challenge nonce sent in `Hello`.
pub const CLIENT_NONCE_SIZE: usize = 32;

/// Factory for per-negotiation client state.
#[async_trait]
pub trait NegotiationStrategy: Send + Sync {
    /// Per-negotiation state.
    type State: ClientNegotiationState;

    /// Short protocol name for logs.
    fn name(&self) -> &'static str;

    /// Create state for a negotiation with `target`.
    async fn create_state<E: Environment>(
        &self,
        env: &E,
        target: &str,
        reply_to: &str,
    ) -> Result<Self::State, NegotiationError>;

    /// Whether tokens from this strategy may be served from the driver's
    /// cache.
    fn cacheable(&self) -> bool {
        true
    }
}

/// One negotiation in progress on the client.
pub trait ClientNegotiationState: Send {
    /// Next request to send, given the reply to the previous one (`None`
    /// before the first leg). `Ok(None)` means there is nothing left to send.
    fn next_request<E: Environment>(
        &mut self,
        env: &E,
        reply: Option<&ReplyEnvelope>,
    ) -> Result<Option<RequestEnvelope>, NegotiationError>;

    /// Whether the negotiation produced a token.
    fn is_complete(&self) -> bool;

    /// Take the negotiated token.
    fn take_token(&mut self) -> Option<SessionToken>;

    /// Release secrets held by the state.
    fn dispose(&mut self) {}
}

fn issued_of(reply: &ReplyEnvelope) -> Result<&IssuedToken, NegotiationError> {
    match (&reply.issued, reply.complete) {
        (Some(issued), true) => Ok(issued),
        _ => Err(NegotiationError::ProtocolViolation(
            "final reply carries no issued token".to_string(),
        )),
    }
}

fn build_token(issued: &IssuedToken, key: SymmetricKey) -> Result<SessionToken, NegotiationError> {
    let token = SessionToken::new(
        issued.context_id.clone(),
        issued.key_generation.clone(),
        key,
        issued.valid_from,
        issued.valid_to,
        issued.claims.clone(),
    )?;
    Ok(match &issued.cookie {
        Some(cookie) => token.with_cookie(cookie.clone()),
        None => token,
    })
}

fn unexpected_reply(protocol: &str) -> NegotiationError {
    NegotiationError::ProtocolViolation(format!("{protocol}: reply after negotiation finished"))
}

/// Single-leg entropy exchange.
#[derive(Debug, Clone, Default)]
pub struct EntropyNegotiation {
    evidence: IdentityEvidence,
}

impl EntropyNegotiation {
    /// Negotiate presenting `evidence` from the lower security layer.
    pub fn new(evidence: IdentityEvidence) -> Self {
        Self { evidence }
    }
}

#[async_trait]
impl NegotiationStrategy for EntropyNegotiation {
    type State = EntropyClientState;

    fn name(&self) -> &'static str {
        "entropy"
    }

    async fn create_state<E: Environment>(
        &self,
        _env: &E,
        target: &str,
        reply_to: &str,
    ) -> Result<Self::State, NegotiationError> {
        Ok(EntropyClientState {
            to: target.to_string(),
            reply_to: reply_to.to_string(),
            evidence: self.evidence.clone(),
            client_entropy: None,
            token: None,
            complete: false,
        })
    }
}

/// Client state for [`EntropyNegotiation`].
#[derive(Debug)]
pub struct EntropyClientState {
    to: String,
    reply_to: String,
    evidence: IdentityEvidence,
    client_entropy: Option<SymmetricKey>,
    token: Option<SessionToken>,
    complete: bool,
}

impl ClientNegotiationState for EntropyClientState {
    fn next_request<E: Environment>(
        &mut self,
        env: &E,
        reply: Option<&ReplyEnvelope>,
    ) -> Result<Option<RequestEnvelope>, NegotiationError> {
        let Some(reply) = reply else {
            let entropy = env.random_array::<ENTROPY_SIZE>();
            let blob = encode_blob(&EntropyBlob::Request { entropy: entropy.to_vec() })?;
            self.client_entropy = Some(SymmetricKey::from_bytes(entropy.to_vec()));

            let mut request = RequestEnvelope::new(
                MessageId::random(env),
                self.to.clone(),
                self.reply_to.clone(),
                RequestAction::Issue,
                blob,
            );
            request.evidence = self.evidence.clone();
            return Ok(Some(request));
        };

        if self.complete {
            return Err(unexpected_reply("entropy"));
        }
        let client_entropy = self.client_entropy.take().ok_or_else(|| {
            NegotiationError::ProtocolViolation("entropy reply before request".to_string())
        })?;
        let issued = issued_of(reply)?;
        let EntropyBlob::Response { entropy: server_entropy } = decode_blob(&reply.blob)? else {
            return Err(NegotiationError::ProtocolViolation(
                "expected entropy response".to_string(),
            ));
        };

        let key = entropy_session_key(client_entropy.as_bytes(), &server_entropy, issued.key_bits)?;
        self.token = Some(build_token(issued, key)?);
        self.complete = true;
        Ok(None)
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn take_token(&mut self) -> Option<SessionToken> {
        self.token.take()
    }

    fn dispose(&mut self) {
        self.client_entropy = None;
        self.token = None;
    }
}

/// Two-leg challenge/response against a pre-shared credential, with mutual
/// proofs.
#[derive(Debug, Clone)]
pub struct ChallengeNegotiation {
    principal: String,
    credential: SymmetricKey,
}

impl ChallengeNegotiation {
    /// Authenticate as `principal` holding `credential`.
    pub fn new(principal: impl Into<String>, credential: SymmetricKey) -> Self {
        Self { principal: principal.into(), credential }
    }
}

#[async_trait]
impl NegotiationStrategy for ChallengeNegotiation {
    type State = ChallengeClientState;

    fn name(&self) -> &'static str {
        "challenge"
    }

    async fn create_state<E: Environment>(
        &self,
        env: &E,
        target: &str,
        reply_to: &str,
    ) -> Result<Self::State, NegotiationError> {
        Ok(ChallengeClientState {
            to: target.to_string(),
            reply_to: reply_to.to_string(),
            principal: self.principal.clone(),
            credential: Some(self.credential.clone()),
            client_nonce: env.random_array::<CLIENT_NONCE_SIZE>().to_vec(),
            phase: ChallengePhase::Start,
            token: None,
        })
    }
}

#[derive(Debug)]
enum ChallengePhase {
    Start,
    AwaitingChallenge,
    AwaitingFinal { context: String, server_nonce: Vec<u8>, client_entropy: Vec<u8> },
    Complete,
}

/// Client state for [`ChallengeNegotiation`].
#[derive(Debug)]
pub struct ChallengeClientState {
    to: String,
    reply_to: String,
    principal: String,
    credential: Option<SymmetricKey>,
    client_nonce: Vec<u8>,
    phase: ChallengePhase,
    token: Option<SessionToken>,
}

impl ChallengeClientState {
    fn credential(&self) -> Result<&SymmetricKey, NegotiationError> {
        self.credential.as_ref().ok_or_else(|| {
            NegotiationError::ProtocolViolation("negotiation state disposed".to_string())
        })
    }

    fn hello<E: Environment>(&mut self, env: &E) -> Result<RequestEnvelope, NegotiationError> {
        let blob = encode_blob(&ChallengeBlob::Hello {
            principal: self.principal.clone(),
            client_nonce: self.client_nonce.clone(),
        })?;
        self.phase = ChallengePhase::AwaitingChallenge;
        Ok(RequestEnvelope::new(
            MessageId::random(env),
            self.to.clone(),
            self.reply_to.clone(),
            RequestAction::Issue,
            blob,
        ))
    }

    fn answer_challenge<E: Environment>(
        &mut self,
        env: &E,
        reply: &ReplyEnvelope,
    ) -> Result<RequestEnvelope, NegotiationError> {
        if reply.complete {
            return Err(NegotiationError::ProtocolViolation(
                "challenge negotiation completed after one leg".to_string(),
            ));
        }
        let context = reply.context.clone().ok_or_else(|| {
            NegotiationError::ProtocolViolation("challenge without context".to_string())
        })?;
        let ChallengeBlob::Challenge { server_nonce } = decode_blob(&reply.blob)? else {
            return Err(NegotiationError::ProtocolViolation("expected challenge".to_string()));
        };

        let client_entropy = env.random_array::<ENTROPY_SIZE>().to_vec();
        let transcript = ChallengeTranscript {
            context: &context,
            client_nonce: &self.client_nonce,
            server_nonce: &server_nonce,
            client_entropy: &client_entropy,
        };
        let proof = transcript.client_proof(self.credential()?);
        let blob = encode_blob(&ChallengeBlob::Proof {
            proof: proof.to_vec(),
            client_entropy: client_entropy.clone(),
        })?;

        let mut request = RequestEnvelope::new(
            MessageId::random(env),
            self.to.clone(),
            self.reply_to.clone(),
            RequestAction::IssueContinue,
            blob,
        );
        request.context = Some(context.clone());
        self.phase = ChallengePhase::AwaitingFinal { context, server_nonce, client_entropy };
        Ok(request)
    }

    fn finish(
        &self,
        reply: &ReplyEnvelope,
        context: &str,
        server_nonce: &[u8],
        client_entropy: &[u8],
    ) -> Result<SessionToken, NegotiationError> {
        let issued = issued_of(reply)?;
        if issued.context_id != context {
            return Err(NegotiationError::ProtocolViolation(format!(
                "issued token context {} does not match negotiation {context}",
                issued.context_id
            )));
        }
        let ChallengeBlob::Final { server_entropy, server_proof } = decode_blob(&reply.blob)?
        else {
            return Err(NegotiationError::ProtocolViolation("expected final leg".to_string()));
        };

        let credential = self.credential()?;
        let transcript = ChallengeTranscript {
            context,
            client_nonce: &self.client_nonce,
            server_nonce,
            client_entropy,
        };
        transcript.verify_server_proof(credential, &server_entropy, &server_proof)?;

        let key = transcript.session_key(credential, &server_entropy, issued.key_bits)?;
        build_token(issued, key)
    }
}

impl ClientNegotiationState for ChallengeClientState {
    fn next_request<E: Environment>(
        &mut self,
        env: &E,
        reply: Option<&ReplyEnvelope>,
    ) -> Result<Option<RequestEnvelope>, NegotiationError> {
        let phase = std::mem::replace(&mut self.phase, ChallengePhase::Complete);
        match (phase, reply) {
            (ChallengePhase::Start, None) => self.hello(env).map(Some),
            (ChallengePhase::AwaitingChallenge, Some(reply)) => {
                self.answer_challenge(env, reply).map(Some)
            },
            (
                ChallengePhase::AwaitingFinal { context, server_nonce, client_entropy },
                Some(reply),
            ) => {
                self.token = Some(self.finish(reply, &context, &server_nonce, &client_entropy)?);
                Ok(None)
            },
            (ChallengePhase::Complete, Some(_)) => Err(unexpected_reply("challenge")),
            (_, _) => Err(NegotiationError::ProtocolViolation(
                "challenge negotiation out of order".to_string(),
            )),
        }
    }

    fn is_complete(&self) -> bool {
        matches!(self.phase, ChallengePhase::Complete) && self.token.is_some()
    }

    fn take_token(&mut self) -> Option<SessionToken> {
        self.token.take()
    }

    fn dispose(&mut self) {
        self.credential = None;
        self.client_nonce.clear();
        self.phase = ChallengePhase::Complete;
    }
}

/// Re-key an issued token.
///
/// The request proves possession of the previous key; the reply must confirm
/// that proof back.
#[derive(Debug, Clone)]
pub struct RenewNegotiation {
    previous: Arc<SessionToken>,
}

impl RenewNegotiation {
    /// Renew `previous`.
    pub fn new(previous: Arc<SessionToken>) -> Self {
        Self { previous }
    }
}

#[async_trait]
impl NegotiationStrategy for RenewNegotiation {
    type State = RenewClientState;

    fn name(&self) -> &'static str {
        "renew"
    }

    async fn create_state<E: Environment>(
        &self,
        _env: &E,
        target: &str,
        reply_to: &str,
    ) -> Result<Self::State, NegotiationError> {
        Ok(RenewClientState {
            to: target.to_string(),
            reply_to: reply_to.to_string(),
            previous: Arc::clone(&self.previous),
            client_entropy: None,
            correlation: None,
            token: None,
        })
    }

    fn cacheable(&self) -> bool {
        false
    }
}

/// Client state for [`RenewNegotiation`].
#[derive(Debug)]
pub struct RenewClientState {
    to: String,
    reply_to: String,
    previous: Arc<SessionToken>,
    client_entropy: Option<SymmetricKey>,
    correlation: Option<CorrelationState>,
    token: Option<SessionToken>,
}

impl ClientNegotiationState for RenewClientState {
    fn next_request<E: Environment>(
        &mut self,
        env: &E,
        reply: Option<&ReplyEnvelope>,
    ) -> Result<Option<RequestEnvelope>, NegotiationError> {
        let Some(reply) = reply else {
            let entropy = env.random_array::<ENTROPY_SIZE>();
            let message_id = MessageId::random(env);
            let proof = possession_proof(self.previous.key(), message_id);

            let mut signatures = OutgoingSignatures::new();
            signatures.record(proof.to_vec(), false);
            self.correlation =
                Some(signatures.into_correlation_state(Some(Arc::clone(&self.previous))));
            self.client_entropy = Some(SymmetricKey::from_bytes(entropy.to_vec()));

            let mut request = RequestEnvelope::new(
                message_id,
                self.to.clone(),
                self.reply_to.clone(),
                RequestAction::Renew,
                encode_blob(&RenewBlob { entropy: entropy.to_vec() })?,
            );
            request.context = Some(self.previous.context_id().to_string());
            request.token_ref = Some(TokenReference {
                context_id: self.previous.context_id().to_string(),
                key_generation: self.previous.key_generation().to_string(),
                cookie: self.previous.cookie().map(<[u8]>::to_vec),
            });
            request.proof = Some(proof.to_vec());
            return Ok(Some(request));
        };

        let (Some(client_entropy), Some(correlation)) =
            (self.client_entropy.take(), self.correlation.take())
        else {
            return Err(unexpected_reply("renew"));
        };
        SignatureConfirmationCorrelator::verify(&correlation, &reply.confirmations)?;

        let issued = issued_of(reply)?;
        if issued.context_id != self.previous.context_id() {
            return Err(NegotiationError::ProtocolViolation(format!(
                "renewal returned context {} for {}",
                issued.context_id,
                self.previous.context_id()
            )));
        }
        let RenewBlob { entropy: server_entropy } = decode_blob(&reply.blob)?;
        let key = renewed_session_key(
            self.previous.key(),
            client_entropy.as_bytes(),
            &server_entropy,
            &issued.key_generation,
            issued.key_bits,
        )?;
        self.token = Some(build_token(issued, key)?);
        Ok(None)
    }

    fn is_complete(&self) -> bool {
        self.token.is_some()
    }

    fn take_token(&mut self) -> Option<SessionToken> {
        self.token.take()
    }

    fn dispose(&mut self) {
        self.client_entropy = None;
        self.correlation = None;
    }
}
