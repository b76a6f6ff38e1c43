//! Authenticator configuration.

use std::time::Duration;

use parley_core::{ConfigError, StoreConfig, TokenCacheConfig, TrustVersion};
use parley_crypto::AlgorithmSuite;

/// Default lifetime of issued session tokens (10 hours).
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(10 * 60 * 60);

/// Default window during which a superseded key generation is still accepted.
pub const DEFAULT_KEY_ROLLOVER_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default cap on negotiations processed at once.
pub const DEFAULT_MAX_CONCURRENT_NEGOTIATIONS: usize = 128;

/// Configuration for [`crate::ServerNegotiationAuthenticator`] and the
/// service wrapping it.
#[derive(Debug, Clone)]
pub struct AuthenticatorConfig {
    /// Negotiation state store limits
    pub store: StoreConfig,
    /// Issued token cache limits
    pub cache: TokenCacheConfig,
    /// Lifetime of issued tokens
    pub token_lifetime: Duration,
    /// WS-Trust version, which fixes reply actions
    pub trust_version: TrustVersion,
    /// Algorithm suite issued keys must satisfy
    pub suite: AlgorithmSuite,
    /// Issue self-contained cookie tokens instead of caching
    pub cookie_mode: bool,
    /// Requests processed concurrently before answering `ServerTooBusy`
    pub max_concurrent_negotiations: usize,
    /// How long a renewed token's previous generation stays valid
    pub key_rollover_interval: Duration,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            cache: TokenCacheConfig::default(),
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            trust_version: TrustVersion::default(),
            suite: AlgorithmSuite::default(),
            cookie_mode: false,
            max_concurrent_negotiations: DEFAULT_MAX_CONCURRENT_NEGOTIATIONS,
            key_rollover_interval: DEFAULT_KEY_ROLLOVER_INTERVAL,
        }
    }
}

impl AuthenticatorConfig {
    /// Validate every nested limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.cache.validate()?;
        ConfigError::check_duration("token_lifetime", self.token_lifetime)?;
        if self.max_concurrent_negotiations == 0 {
            return Err(ConfigError::invalid("max_concurrent_negotiations", "must be at least 1"));
        }
        if self.key_rollover_interval > self.token_lifetime {
            return Err(ConfigError::invalid(
                "key_rollover_interval",
                "must not exceed token_lifetime",
            ));
        }
        Ok(())
    }
}
