//! Application-facing token provider.
//!
//! Wraps a [`ClientIssuanceDriver`] for one issuer and keeps the current
//! token. After a renewal the previous token keeps verifying incoming
//! messages for the rollover interval, so replies protected with the old key
//! that cross the renewal in flight are not rejected.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, SystemTime},
};

use parley_core::{ConfigError, Environment, SessionToken};

use crate::{
    channel::ChannelFactory,
    config::ProviderConfig,
    driver::ClientIssuanceDriver,
    error::IssuanceError,
    strategy::{NegotiationStrategy, RenewNegotiation},
};

#[derive(Debug, Default)]
struct ProviderKeys {
    current: Option<Arc<SessionToken>>,
    previous: Option<(Arc<SessionToken>, SystemTime)>,
}

/// Issues, renews and hands out session tokens for one issuer.
pub struct SessionTokenProvider<E: Environment, F: ChannelFactory, S: NegotiationStrategy> {
    driver: ClientIssuanceDriver<E, F>,
    strategy: S,
    target: String,
    via: String,
    config: ProviderConfig,
    keys: Mutex<ProviderKeys>,
}

impl<E, F, S> SessionTokenProvider<E, F, S>
where
    E: Environment,
    F: ChannelFactory,
    S: NegotiationStrategy,
{
    /// Provider for tokens issued by `target`, reached through `via`.
    pub fn new(
        env: E,
        factory: F,
        strategy: S,
        target: impl Into<String>,
        via: impl Into<String>,
        config: ProviderConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let driver = ClientIssuanceDriver::new(env, factory, config.client.clone())?;
        Ok(Self {
            driver,
            strategy,
            target: target.into(),
            via: via.into(),
            config,
            keys: Mutex::new(ProviderKeys::default()),
        })
    }

    /// Underlying driver.
    pub fn driver(&self) -> &ClientIssuanceDriver<E, F> {
        &self.driver
    }

    /// Configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Obtain a token, reusing a fresh cached one.
    pub async fn issue_token(
        &self,
        timeout: Duration,
    ) -> Result<Arc<SessionToken>, IssuanceError> {
        let token =
            self.driver.negotiate(&self.strategy, &self.target, &self.via, timeout).await?;

        let mut keys = self.lock_keys();
        keys.current = Some(Arc::clone(&token));
        keys.previous = None;
        Ok(token)
    }

    /// Re-key `existing`. The old token stays acceptable for incoming
    /// messages until the rollover interval passes or it expires.
    pub async fn renew_token(
        &self,
        existing: &Arc<SessionToken>,
        timeout: Duration,
    ) -> Result<Arc<SessionToken>, IssuanceError> {
        let renew = RenewNegotiation::new(Arc::clone(existing));
        let renewed = self.driver.negotiate(&renew, &self.target, &self.via, timeout).await?;
        self.driver.cache_token(&self.target, Arc::clone(&renewed));

        let rollover_end = self
            .driver
            .env()
            .wall_clock()
            .checked_add(self.config.key_rollover_interval)
            .map_or(existing.valid_to(), |end| end.min(existing.valid_to()));
        let mut keys = self.lock_keys();
        keys.current = Some(Arc::clone(&renewed));
        keys.previous = Some((Arc::clone(existing), rollover_end));

        tracing::debug!(
            context = renewed.context_id(),
            previous = existing.key_generation(),
            generation = renewed.key_generation(),
            "rolled over to renewed key"
        );
        Ok(renewed)
    }

    /// Forget `token` locally. The issuer is not contacted.
    ///
    /// Returns whether the provider or the driver cache held it.
    pub fn cancel_token(&self, token: &SessionToken) -> bool {
        let same = |held: &SessionToken| {
            held.context_id() == token.context_id()
                && held.key_generation() == token.key_generation()
        };

        let mut cancelled = self.driver.forget_token(&self.target, token);
        let mut keys = self.lock_keys();
        if keys.current.as_deref().is_some_and(same) {
            keys.current = None;
            cancelled = true;
        }
        if keys.previous.as_ref().is_some_and(|(previous, _)| same(previous)) {
            keys.previous = None;
            cancelled = true;
        }
        cancelled
    }

    /// Token used to protect outgoing messages.
    pub fn current_token(&self) -> Option<Arc<SessionToken>> {
        self.lock_keys().current.clone()
    }

    /// Tokens accepted on incoming messages at `now`: the current token, plus
    /// the previous one while its rollover window is open.
    pub fn incoming_tokens(&self, now: SystemTime) -> Vec<Arc<SessionToken>> {
        let keys = self.lock_keys();
        let mut tokens: Vec<_> = keys.current.iter().cloned().collect();
        if let Some((previous, until)) = &keys.previous {
            if now < *until {
                tokens.push(Arc::clone(previous));
            }
        }
        tokens
    }

    /// Whether the current key should be renewed at `now`.
    ///
    /// Uses the cache freshness formula, capped by the key renewal interval.
    pub fn needs_renewal(&self, now: SystemTime) -> bool {
        let policy = self.config.renewal_policy();
        self.lock_keys().current.as_ref().is_none_or(|token| !token.is_fresh_at(now, &policy))
    }

    /// Current token, renewing or reissuing it first when it is due.
    pub async fn token(&self, timeout: Duration) -> Result<Arc<SessionToken>, IssuanceError> {
        let now = self.driver.env().wall_clock();
        let current = self.current_token();
        match current {
            Some(token) if !self.needs_renewal(now) => Ok(token),
            Some(token) if !token.is_expired_at(now) => self.renew_token(&token, timeout).await,
            _ => self.issue_token(timeout).await,
        }
    }

    fn lock_keys(&self) -> std::sync::MutexGuard<'_, ProviderKeys> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
