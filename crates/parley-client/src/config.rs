//! Client configuration.

use std::time::Duration;

use parley_core::{
    CachingPolicy, ConfigError, TrustVersion, config::DEFAULT_RENEWAL_THRESHOLD_PERCENT,
};
use parley_crypto::AlgorithmSuite;

/// Default interval after which the provider renews its key (10 hours).
pub const DEFAULT_KEY_RENEWAL_INTERVAL: Duration = Duration::from_secs(10 * 60 * 60);

/// Default window during which the previous key still verifies incoming
/// messages after a renewal.
pub const DEFAULT_KEY_ROLLOVER_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration for [`crate::ClientIssuanceDriver`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Algorithm suite issued keys must satisfy
    pub suite: AlgorithmSuite,
    /// Reuse issued tokens while fresh
    pub cache_issued_tokens: bool,
    /// Percentage (1..=100) of a token's lifetime during which it is reused
    pub renewal_threshold_percent: u8,
    /// Absolute cap on reuse; `None` is unbounded
    pub max_caching_time: Option<Duration>,
    /// WS-Trust version
    pub trust_version: TrustVersion,
    /// Reply address placed in requests
    pub reply_to: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            suite: AlgorithmSuite::default(),
            cache_issued_tokens: true,
            renewal_threshold_percent: DEFAULT_RENEWAL_THRESHOLD_PERCENT,
            max_caching_time: None,
            trust_version: TrustVersion::default(),
            reply_to: "urn:parley:anonymous".to_string(),
        }
    }
}

impl ClientConfig {
    /// Freshness policy for cached tokens.
    pub fn caching_policy(&self) -> CachingPolicy {
        CachingPolicy {
            threshold_percent: self.renewal_threshold_percent,
            max_caching_time: self.max_caching_time,
        }
    }

    /// Validate the threshold range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.caching_policy().validate()
    }
}

/// Configuration for [`crate::SessionTokenProvider`].
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Driver configuration
    pub client: ClientConfig,
    /// Renew the key at the latest this long after `valid_from`
    pub key_renewal_interval: Duration,
    /// Keep accepting the previous key this long after a renewal
    pub key_rollover_interval: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            key_renewal_interval: DEFAULT_KEY_RENEWAL_INTERVAL,
            key_rollover_interval: DEFAULT_KEY_ROLLOVER_INTERVAL,
        }
    }
}

impl ProviderConfig {
    /// Renewal must be bounded and rollover must not outlast it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;
        ConfigError::check_duration("key_renewal_interval", self.key_renewal_interval)?;
        if self.key_rollover_interval > self.key_renewal_interval {
            return Err(ConfigError::invalid(
                "key_rollover_interval",
                "must not exceed key_renewal_interval",
            ));
        }
        Ok(())
    }

    /// Policy deciding when the current key is due for renewal.
    pub fn renewal_policy(&self) -> CachingPolicy {
        CachingPolicy {
            threshold_percent: self.client.renewal_threshold_percent,
            max_caching_time: Some(self.key_renewal_interval),
        }
    }
}
