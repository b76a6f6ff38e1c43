//! Server side of token negotiation.
//!
//! [`ServerNegotiationAuthenticator::process_message`] is called once per
//! inbound request. Issuance legs move a context through
//! `NoState → InProgress → Completed | Failed`:
//!
//! 1. `Issue` creates state through the protocol's first leg; duplicate
//!    contexts are rejected.
//! 2. `IssueContinue` advances existing state under its own lock; unknown
//!    contexts are rejected.
//! 3. On completion the token is minted, cached (unless cookie mode), the
//!    listener notified and the negotiation state removed and disposed.
//!    Otherwise the state is stored and the channel tracked for idle reaping.
//!
//! `Renew` and `Cancel` operate on issued tokens and need a proof of
//! possession of the token's current key.
//!
//! Any failure tears down the state the request touched, emits a `warn`
//! audit event and becomes a fault reply through the fault table.

use std::sync::{Arc, Mutex, PoisonError};

use parley_core::{
    CacheAddResult, Claim, ConfigError, Environment, IssuedToken, MessageId, NegotiationError,
    NegotiationState, NegotiationStateStore, ReplyAction, ReplyEnvelope, RequestAction,
    RequestEnvelope, SecurityTokenCache, SessionToken, SharedNegotiationState, TokenReference,
    fault_for,
    protocol::{RenewBlob, decode_blob, encode_blob, renewed_session_key, verify_possession},
};
use parley_crypto::{AeadStateEncoder, ENTROPY_SIZE, SecurityStateEncoder, SymmetricKey};
use tokio::sync::Notify;

use crate::{
    config::AuthenticatorConfig,
    cookie,
    protocol::{Completion, ServerNegotiationProtocol},
    reaper::{IdleSessionReaper, NegotiationChannel},
};

/// Notified when tokens are issued or renewed.
pub trait IssuanceListener: Send + Sync {
    /// A negotiation produced a new token.
    fn on_token_issued(&self, _token: &Arc<SessionToken>) {}

    /// A renewal superseded `previous` with `renewed`.
    fn on_token_renewed(&self, _renewed: &Arc<SessionToken>, _previous: &Arc<SessionToken>) {}
}

/// Drives the server side of every negotiation for one protocol.
pub struct ServerNegotiationAuthenticator<E: Environment, P: ServerNegotiationProtocol> {
    env: E,
    protocol: P,
    config: AuthenticatorConfig,
    store: NegotiationStateStore<P::Payload, E::Instant>,
    cache: SecurityTokenCache,
    cookies: Option<Box<dyn SecurityStateEncoder>>,
    listener: Option<Arc<dyn IssuanceListener>>,
    reaper: Mutex<IdleSessionReaper<E::Instant>>,
    reaper_wakeup: Arc<Notify>,
}

impl<E: Environment, P: ServerNegotiationProtocol> ServerNegotiationAuthenticator<E, P> {
    /// Create an authenticator.
    ///
    /// In cookie mode a random state key is generated; use
    /// [`Self::with_cookie_encoder`] to share one across issuers.
    pub fn new(env: E, protocol: P, config: AuthenticatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let cookies: Option<Box<dyn SecurityStateEncoder>> = if config.cookie_mode {
            let state_key = SymmetricKey::from_bytes(env.random_array::<32>().to_vec());
            let encoder = AeadStateEncoder::new(&state_key)
                .map_err(|e| ConfigError::invalid("cookie_mode", e.to_string()))?;
            Some(Box::new(encoder))
        } else {
            None
        };

        Ok(Self {
            store: NegotiationStateStore::new(config.store.clone()),
            cache: SecurityTokenCache::new(&config.cache),
            reaper: Mutex::new(IdleSessionReaper::new(config.store.negotiation_timeout)),
            reaper_wakeup: Arc::new(Notify::new()),
            cookies,
            listener: None,
            env,
            protocol,
            config,
        })
    }

    /// Notify `listener` of issuance and renewal.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn IssuanceListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Issue cookie-mode tokens sealed by `encoder`.
    #[must_use]
    pub fn with_cookie_encoder(mut self, encoder: Box<dyn SecurityStateEncoder>) -> Self {
        self.config.cookie_mode = true;
        self.cookies = Some(encoder);
        self
    }

    /// Environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Configuration.
    pub fn config(&self) -> &AuthenticatorConfig {
        &self.config
    }

    /// Issued token cache.
    pub fn cache(&self) -> &SecurityTokenCache {
        &self.cache
    }

    /// Negotiations currently in progress.
    pub fn pending_negotiations(&self) -> usize {
        self.store.len()
    }

    /// Whether negotiation state exists for `context`.
    pub fn has_negotiation(&self, context: &str) -> bool {
        self.store.contains(context)
    }

    /// Handle one inbound request and produce its reply.
    ///
    /// Never fails: errors become fault replies. `channel` identifies the
    /// inbound session for idle reaping.
    pub fn process_message(
        &self,
        request: &RequestEnvelope,
        channel: Option<&Arc<dyn NegotiationChannel>>,
    ) -> ReplyEnvelope {
        let negotiating =
            matches!(request.action, RequestAction::Issue | RequestAction::IssueContinue);
        if let (true, Some(channel)) = (negotiating, channel) {
            self.track_channel(channel);
        }

        let result = match request.action {
            RequestAction::Issue => self.process_issue(request),
            RequestAction::IssueContinue => self.process_continue(request),
            RequestAction::Renew => self.process_renew(request),
            RequestAction::Cancel => self.process_cancel(request),
        };

        let finished = !matches!(&result, Ok(reply) if !reply.complete);
        if let (true, true, Some(channel)) = (negotiating, finished, channel) {
            self.untrack_channel(channel.id());
        }

        result.unwrap_or_else(|err| {
            let fault = fault_for(&err);
            tracing::warn!(
                context = request.context.as_deref().unwrap_or("-"),
                action = %request.action,
                protocol = self.protocol.name(),
                fault = %fault.code,
                error = %err,
                "negotiation request failed"
            );
            ReplyEnvelope::fault(request, MessageId::random(&self.env), fault)
        })
    }

    fn process_issue(&self, request: &RequestEnvelope) -> Result<ReplyEnvelope, NegotiationError> {
        let context = request.context.clone().unwrap_or_else(|| self.env.new_urn());
        if self.store.contains(&context) {
            return Err(NegotiationError::DuplicateNegotiationState { context });
        }

        let (payload, outcome) =
            self.protocol.process_first_leg(&self.env, request, &context, self.key_bits())?;
        let mut state = NegotiationState::new(
            context.clone(),
            request.to.clone(),
            request.reply_to.clone(),
            payload,
        );

        let Some(completion) = outcome.completion else {
            self.store.add_state(context.clone(), state.into_shared(), self.env.now())?;
            tracing::debug!(%context, protocol = self.protocol.name(), "negotiation in progress");
            return Ok(self.leg_reply(request, &context, outcome.blob, None));
        };

        let token = self.complete(&mut state, completion)?;
        state.dispose();
        let issued = self.publish_issued(&token)?;
        Ok(self.leg_reply(request, &context, outcome.blob, Some(issued)))
    }

    fn process_continue(
        &self,
        request: &RequestEnvelope,
    ) -> Result<ReplyEnvelope, NegotiationError> {
        let context = request.context.as_deref().ok_or_else(|| {
            NegotiationError::ProtocolViolation("continuation without context".to_string())
        })?;
        let state = self.store.get_state(context, self.env.now()).ok_or_else(|| {
            NegotiationError::UnknownNegotiationState { context: context.to_string() }
        })?;

        let step = {
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            self.advance(&mut guard, request)
        };

        let (blob, token) = match step {
            Ok(step) => step,
            Err(err) => {
                self.teardown(context, &state);
                return Err(err);
            },
        };

        let Some(token) = token else {
            return Ok(self.leg_reply(request, context, blob, None));
        };

        self.teardown(context, &state);
        let issued = self.publish_issued(&token)?;
        Ok(self.leg_reply(request, context, blob, Some(issued)))
    }

    fn advance(
        &self,
        state: &mut NegotiationState<P::Payload>,
        request: &RequestEnvelope,
    ) -> Result<(Vec<u8>, Option<Arc<SessionToken>>), NegotiationError> {
        if state.is_disposed() || state.is_completed() {
            return Err(NegotiationError::ProtocolViolation(format!(
                "negotiation {} is no longer active",
                state.context()
            )));
        }

        let context = state.context().to_string();
        let outcome = self.protocol.process_next_leg(
            &self.env,
            request,
            &context,
            state.payload_mut(),
            self.key_bits(),
        )?;

        let token = match outcome.completion {
            Some(completion) => Some(self.complete(state, completion)?),
            None => None,
        };
        Ok((outcome.blob, token))
    }

    fn teardown(&self, context: &str, state: &SharedNegotiationState<P::Payload>) {
        drop(self.store.remove_state(context));
        state.lock().unwrap_or_else(PoisonError::into_inner).dispose();
    }

    fn complete(
        &self,
        state: &mut NegotiationState<P::Payload>,
        completion: Completion,
    ) -> Result<Arc<SessionToken>, NegotiationError> {
        let token = self.mint(
            state.context(),
            self.env.new_urn(),
            completion.key,
            completion.claims,
        )?;
        state.set_completed(Arc::clone(&token))?;
        Ok(token)
    }

    fn mint(
        &self,
        context: &str,
        key_generation: String,
        key: SymmetricKey,
        claims: Vec<Claim>,
    ) -> Result<Arc<SessionToken>, NegotiationError> {
        self.config.suite.validate_key_size(key.bits())?;

        let now = self.env.wall_clock();
        let valid_to = now.checked_add(self.config.token_lifetime).ok_or_else(|| {
            NegotiationError::EndpointUnavailable(
                "token lifetime overflows the issuer clock".to_string(),
            )
        })?;
        let token = SessionToken::new(context, key_generation, key, now, valid_to, claims)?;

        let token = match &self.cookies {
            Some(encoder) => {
                let sealed = cookie::seal(encoder.as_ref(), &token, self.env.random_array())?;
                token.with_cookie(sealed)
            },
            None => token,
        };
        Ok(Arc::new(token))
    }

    fn publish_issued(&self, token: &Arc<SessionToken>) -> Result<IssuedToken, NegotiationError> {
        if !token.is_cookie_mode() {
            match self.cache.try_add(Arc::clone(token), self.env.wall_clock()) {
                CacheAddResult::Added | CacheAddResult::Evicted(_) => {},
                CacheAddResult::Duplicate => {
                    return Err(NegotiationError::ProtocolViolation(format!(
                        "token {} generation {} already issued",
                        token.context_id(),
                        token.key_generation()
                    )));
                },
                CacheAddResult::AlreadyExpired => {
                    return Err(NegotiationError::ProtocolViolation(
                        "issued token expired before it was cached".to_string(),
                    ));
                },
            }
        }

        if let Some(listener) = &self.listener {
            listener.on_token_issued(token);
        }
        tracing::info!(
            context = token.context_id(),
            generation = token.key_generation(),
            cookie = token.is_cookie_mode(),
            claims = token.claims().len(),
            "session token issued"
        );
        Ok(issued_token(token))
    }

    fn leg_reply(
        &self,
        request: &RequestEnvelope,
        context: &str,
        blob: Vec<u8>,
        issued: Option<IssuedToken>,
    ) -> ReplyEnvelope {
        let complete = issued.is_some();
        let action = self.config.trust_version.issue_reply_action(complete);

        let mut reply = ReplyEnvelope::for_request(request, MessageId::random(&self.env), action);
        reply.context = Some(context.to_string());
        reply.blob = blob;
        reply.complete = complete;
        reply.issued = issued;
        reply
    }

    fn process_renew(&self, request: &RequestEnvelope) -> Result<ReplyEnvelope, NegotiationError> {
        let previous = self.authorize_token_request(request)?;
        if self.cookies.is_none() {
            self.ensure_latest_generation(&previous)?;
        }
        let RenewBlob { entropy: client_entropy } = decode_blob(&request.blob)?;

        let server_entropy = self.env.random_array::<ENTROPY_SIZE>();
        let generation = self.env.new_urn();
        let key = renewed_session_key(
            previous.key(),
            &client_entropy,
            &server_entropy,
            &generation,
            previous.key().bits(),
        )?;
        let renewed =
            self.mint(previous.context_id(), generation, key, previous.claims().to_vec())?;

        if !renewed.is_cookie_mode() {
            let now = self.env.wall_clock();
            self.cache.add_or_replace(Arc::clone(&renewed), now);
            let rollover_end = now
                .checked_add(self.config.key_rollover_interval)
                .map_or(previous.valid_to(), |end| end.min(previous.valid_to()));
            self.cache.update_expiration(
                previous.context_id(),
                previous.key_generation(),
                rollover_end,
            );
        }

        if let Some(listener) = &self.listener {
            listener.on_token_renewed(&renewed, &previous);
        }
        tracing::info!(
            context = renewed.context_id(),
            previous = previous.key_generation(),
            generation = renewed.key_generation(),
            "session token renewed"
        );

        let mut reply =
            ReplyEnvelope::for_request(request, MessageId::random(&self.env), ReplyAction::Renew);
        reply.context = Some(renewed.context_id().to_string());
        reply.blob = encode_blob(&RenewBlob { entropy: server_entropy.to_vec() })?;
        reply.complete = true;
        reply.issued = Some(issued_token(&renewed));
        echo_proof(request, &mut reply);
        Ok(reply)
    }

    /// Only the newest generation of a context may be renewed. Superseded
    /// generations stay usable for rollover and cancel.
    fn ensure_latest_generation(&self, token: &SessionToken) -> Result<(), NegotiationError> {
        let latest = self.cache.latest(token.context_id(), self.env.wall_clock());
        match latest {
            Some(latest) if latest.key_generation() == token.key_generation() => Ok(()),
            _ => Err(NegotiationError::BadContextToken(format!(
                "generation {} of {} has been superseded",
                token.key_generation(),
                token.context_id()
            ))),
        }
    }

    fn process_cancel(&self, request: &RequestEnvelope) -> Result<ReplyEnvelope, NegotiationError> {
        let token = self.authorize_token_request(request)?;
        let removed = self.cache.remove_all(token.context_id());
        tracing::info!(
            context = token.context_id(),
            generations = removed.len(),
            "session token cancelled"
        );

        let mut reply =
            ReplyEnvelope::for_request(request, MessageId::random(&self.env), ReplyAction::Cancel);
        reply.context = Some(token.context_id().to_string());
        reply.complete = true;
        echo_proof(request, &mut reply);
        Ok(reply)
    }

    /// Resolve the referenced token and check the requestor holds its key.
    fn authorize_token_request(
        &self,
        request: &RequestEnvelope,
    ) -> Result<Arc<SessionToken>, NegotiationError> {
        let token_ref = request.token_ref.as_ref().ok_or_else(|| {
            NegotiationError::ProtocolViolation(format!(
                "{} request without token reference",
                request.action
            ))
        })?;
        let token = self.resolve_token(token_ref)?;

        let proof = request.proof.as_deref().ok_or_else(|| {
            NegotiationError::AuthenticationFailed("missing proof of possession".to_string())
        })?;
        verify_possession(token.key(), request.message_id, proof)?;
        Ok(token)
    }

    fn resolve_token(
        &self,
        token_ref: &TokenReference,
    ) -> Result<Arc<SessionToken>, NegotiationError> {
        let now = self.env.wall_clock();

        if let (Some(cookie), Some(encoder)) = (&token_ref.cookie, &self.cookies) {
            let token = cookie::open(encoder.as_ref(), cookie)?;
            if token.context_id() != token_ref.context_id
                || token.key_generation() != token_ref.key_generation
            {
                return Err(NegotiationError::BadContextToken(
                    "cookie does not match token reference".to_string(),
                ));
            }
            if token.is_expired_at(now) {
                return Err(NegotiationError::BadContextToken(format!(
                    "token {} expired",
                    token_ref.context_id
                )));
            }
            return Ok(Arc::new(token));
        }

        self.cache.get(&token_ref.context_id, &token_ref.key_generation, now).ok_or_else(|| {
            NegotiationError::BadContextToken(format!(
                "unknown or expired token {} generation {}",
                token_ref.context_id, token_ref.key_generation
            ))
        })
    }

    fn key_bits(&self) -> usize {
        self.config.suite.default_key_bits()
    }

    fn track_channel(&self, channel: &Arc<dyn NegotiationChannel>) {
        let armed = {
            let mut reaper = self.reaper.lock().unwrap_or_else(PoisonError::into_inner);
            let was_idle = reaper.deadline().is_none();
            reaper.track(Arc::clone(channel), self.env.now());
            was_idle
        };
        if armed {
            self.reaper_wakeup.notify_one();
        }
    }

    fn untrack_channel(&self, id: u64) {
        self.reaper.lock().unwrap_or_else(PoisonError::into_inner).untrack(id);
    }

    /// When the idle reaper should next run, or `None` while nothing is
    /// tracked.
    pub fn idle_deadline(&self) -> Option<E::Instant> {
        self.reaper.lock().unwrap_or_else(PoisonError::into_inner).deadline()
    }

    /// Run the idle reaper once and abort channels idle for two periods.
    /// Returns how many were aborted.
    pub fn reap_idle(&self) -> usize {
        let now = self.env.now();
        let expired = self.reaper.lock().unwrap_or_else(PoisonError::into_inner).poll(now);
        for channel in &expired {
            tracing::info!(channel = channel.id(), "aborting idle negotiation channel");
            channel.abort();
        }
        expired.len()
    }

    /// Signalled whenever the reaper timer goes from disarmed to armed.
    pub fn reaper_wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.reaper_wakeup)
    }
}

fn issued_token(token: &SessionToken) -> IssuedToken {
    IssuedToken {
        context_id: token.context_id().to_string(),
        key_generation: token.key_generation().to_string(),
        valid_from: token.valid_from(),
        valid_to: token.valid_to(),
        claims: token.claims().to_vec(),
        key_bits: token.key().bits(),
        cookie: token.cookie().map(<[u8]>::to_vec),
    }
}

fn echo_proof(request: &RequestEnvelope, reply: &mut ReplyEnvelope) {
    if let Some(proof) = &request.proof {
        reply.confirmations.push(proof.clone(), false);
    }
}
