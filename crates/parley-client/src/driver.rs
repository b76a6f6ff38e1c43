//! Client side of token issuance.
//!
//! [`ClientIssuanceDriver::negotiate`] runs one negotiation end to end:
//!
//! 1. Serve a fresh cached token for the target if there is one.
//! 2. Create the strategy's per-negotiation state and a channel to the
//!    issuer, then open the channel.
//! 3. Loop: ask the state for the next request given the last reply, send it,
//!    and check the reply is neither a fault nor addressed to another
//!    request. Stop when the state has nothing left to send.
//! 4. Close the channel, check the issued key size against the configured
//!    suite and cache the token.
//!
//! One [`TimeoutBudget`] covers every step: each channel operation gets only
//! what is left, and the whole negotiation races a single deadline. Whatever
//! path leaves the negotiation, the channel is aborted unless it was closed
//! cleanly, and the state is disposed.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use parley_core::{
    ConfigError, Environment, NegotiationError, ReplyEnvelope, SessionToken, TimeoutBudget,
};

use crate::{
    channel::{ChannelFactory, RequestChannel},
    config::ClientConfig,
    error::IssuanceError,
    strategy::{ClientNegotiationState, NegotiationStrategy},
};

/// Obtains session tokens from issuers.
pub struct ClientIssuanceDriver<E: Environment, F: ChannelFactory> {
    env: E,
    factory: F,
    config: ClientConfig,
    issued: Mutex<HashMap<String, Arc<SessionToken>>>,
}

impl<E: Environment, F: ChannelFactory> ClientIssuanceDriver<E, F> {
    /// Create a driver.
    pub fn new(env: E, factory: F, config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { env, factory, config, issued: Mutex::new(HashMap::new()) })
    }

    /// Environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Channel factory.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Cached token for `target`, if caching is enabled and the token is
    /// still fresh. Stale entries are dropped.
    pub fn cached_token(&self, target: &str) -> Option<Arc<SessionToken>> {
        if !self.config.cache_issued_tokens {
            return None;
        }
        let now = self.env.wall_clock();
        let policy = self.config.caching_policy();

        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        match issued.get(target) {
            Some(token) if token.is_fresh_at(now, &policy) => Some(Arc::clone(token)),
            Some(_) => {
                issued.remove(target);
                None
            },
            None => None,
        }
    }

    /// Remember `token` for `target` when caching is enabled.
    pub fn cache_token(&self, target: &str, token: Arc<SessionToken>) {
        if self.config.cache_issued_tokens {
            self.issued
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(target.to_string(), token);
        }
    }

    /// Drop the cached token for `target` if it is `token`'s generation.
    pub fn forget_token(&self, target: &str, token: &SessionToken) -> bool {
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        let matches = issued.get(target).is_some_and(|cached| {
            cached.context_id() == token.context_id()
                && cached.key_generation() == token.key_generation()
        });
        if matches {
            issued.remove(target);
        }
        matches
    }

    /// Negotiate a token with `target`, connecting through `via`, within
    /// `timeout`.
    pub async fn negotiate<S: NegotiationStrategy>(
        &self,
        strategy: &S,
        target: &str,
        via: &str,
        timeout: Duration,
    ) -> Result<Arc<SessionToken>, IssuanceError> {
        if strategy.cacheable() {
            if let Some(token) = self.cached_token(target) {
                tracing::debug!(
                    issuer = target,
                    context = token.context_id(),
                    "reusing cached token"
                );
                return Ok(token);
            }
        }

        let budget = TimeoutBudget::start(self.env.now(), timeout);
        let legs = AtomicUsize::new(0);

        let outcome = tokio::select! {
            result = self.run(strategy, target, via, &budget, &legs) => result,
            () = self.env.sleep(timeout) => Err(NegotiationError::Timeout {
                legs_completed: legs.load(Ordering::Relaxed),
                elapsed: budget.elapsed(self.env.now()),
            }),
        };
        let legs_completed = legs.load(Ordering::Relaxed);

        match outcome {
            Ok(token) => {
                let token = Arc::new(token);
                if strategy.cacheable() {
                    self.cache_token(target, Arc::clone(&token));
                }
                tracing::info!(
                    issuer = target,
                    protocol = strategy.name(),
                    context = token.context_id(),
                    generation = token.key_generation(),
                    legs = legs_completed,
                    "session token obtained"
                );
                Ok(token)
            },
            Err(source) => {
                tracing::warn!(
                    issuer = target,
                    protocol = strategy.name(),
                    legs = legs_completed,
                    error = %source,
                    "token issuance failed"
                );
                Err(IssuanceError::new(target, legs_completed, source))
            },
        }
    }

    /// Blocking form of [`Self::negotiate`] on a private current-thread
    /// runtime.
    ///
    /// Must not be called from inside an async runtime.
    pub fn negotiate_blocking<S: NegotiationStrategy>(
        &self,
        strategy: &S,
        target: &str,
        via: &str,
        timeout: Duration,
    ) -> Result<Arc<SessionToken>, IssuanceError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                IssuanceError::new(target, 0, NegotiationError::Transport {
                    target: target.to_string(),
                    reason: format!("failed to start runtime: {e}"),
                })
            })?;
        runtime.block_on(self.negotiate(strategy, target, via, timeout))
    }

    async fn run<S: NegotiationStrategy>(
        &self,
        strategy: &S,
        target: &str,
        via: &str,
        budget: &TimeoutBudget<E::Instant>,
        legs: &AtomicUsize,
    ) -> Result<SessionToken, NegotiationError> {
        let state = strategy.create_state(&self.env, target, &self.config.reply_to).await?;
        let channel = self.factory.create_channel(target, via).await?;
        let mut guard = NegotiationGuard { channel: Some(channel), state };

        let remaining = self.remaining(budget, legs)?;
        guard
            .channel()?
            .open(remaining)
            .await
            .map_err(|err| self.timeout_or(err, budget, legs))?;

        let mut reply: Option<ReplyEnvelope> = None;
        while let Some(request) = guard.state.next_request(&self.env, reply.as_ref())? {
            let remaining = self.remaining(budget, legs)?;
            let sent = request.message_id;
            let action = request.action;
            let version = self.config.trust_version;
            tracing::debug!(
                issuer = target,
                action = %version.request_uri(action),
                leg = legs.load(Ordering::Relaxed) + 1,
                "sending negotiation leg"
            );

            let mut response = guard
                .channel()?
                .request(request, remaining)
                .await
                .map_err(|err| self.timeout_or(err, budget, legs))?;
            legs.fetch_add(1, Ordering::Relaxed);

            if let Some(fault) = response.fault.take() {
                return Err(NegotiationError::Fault(fault));
            }
            if response.relates_to != sent {
                return Err(NegotiationError::ProtocolViolation(format!(
                    "reply relates to {} instead of {sent}",
                    response.relates_to
                )));
            }
            let expected = version.reply_action(action, response.complete);
            if response.action != expected {
                return Err(NegotiationError::ProtocolViolation(format!(
                    "expected {expected:?} reply, got {:?}",
                    response.action
                )));
            }
            tracing::debug!(
                issuer = target,
                action = %version.reply_uri(response.action),
                complete = response.complete,
                "negotiation reply received"
            );
            reply = Some(response);
        }

        if !guard.state.is_complete() {
            return Err(NegotiationError::ProtocolViolation(
                "no outgoing message while negotiation is incomplete".to_string(),
            ));
        }
        let remaining = self.remaining(budget, legs)?;
        guard.close(target, remaining).await;

        let token = guard.state.take_token().ok_or_else(|| {
            NegotiationError::ProtocolViolation(
                "completed negotiation produced no token".to_string(),
            )
        })?;
        self.config.suite.validate_key_size(token.key().bits())?;
        Ok(token)
    }

    /// A channel failure once the budget is spent is reported as the
    /// negotiation timing out.
    fn timeout_or(
        &self,
        err: NegotiationError,
        budget: &TimeoutBudget<E::Instant>,
        legs: &AtomicUsize,
    ) -> NegotiationError {
        let now = self.env.now();
        if budget.is_expired(now) {
            tracing::debug!(error = %err, "channel failed after deadline");
            NegotiationError::Timeout {
                legs_completed: legs.load(Ordering::Relaxed),
                elapsed: budget.elapsed(now),
            }
        } else {
            err
        }
    }

    fn remaining(
        &self,
        budget: &TimeoutBudget<E::Instant>,
        legs: &AtomicUsize,
    ) -> Result<Duration, NegotiationError> {
        let now = self.env.now();
        if budget.is_expired(now) {
            return Err(NegotiationError::Timeout {
                legs_completed: legs.load(Ordering::Relaxed),
                elapsed: budget.elapsed(now),
            });
        }
        Ok(budget.remaining(now))
    }
}

/// Aborts the channel unless it was closed and disposes the state, on every
/// exit path including cancellation by the deadline.
struct NegotiationGuard<C: RequestChannel, S: ClientNegotiationState> {
    channel: Option<C>,
    state: S,
}

impl<C: RequestChannel, S: ClientNegotiationState> NegotiationGuard<C, S> {
    fn channel(&mut self) -> Result<&mut C, NegotiationError> {
        self.channel.as_mut().ok_or_else(|| {
            NegotiationError::ProtocolViolation("negotiation channel already released".to_string())
        })
    }

    async fn close(&mut self, target: &str, timeout: Duration) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        match channel.close(timeout).await {
            Ok(()) => self.channel = None,
            Err(err) => {
                tracing::warn!(
                    issuer = target,
                    error = %err,
                    "closing negotiation channel failed, aborting"
                );
                if let Some(mut channel) = self.channel.take() {
                    channel.abort();
                }
            },
        }
    }
}

impl<C: RequestChannel, S: ClientNegotiationState> Drop for NegotiationGuard<C, S> {
    fn drop(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.abort();
        }
        self.state.dispose();
    }
}
