//! Configuration shared by both peers.
//!
//! Plain structs with `Default`, validated once at construction time and
//! passed explicitly into the components that use them.

use std::time::Duration;

use thiserror::Error;

/// Default bound on concurrently pending negotiations.
pub const DEFAULT_MAX_PENDING_NEGOTIATIONS: usize = 128;

/// Default time a negotiation may stay incomplete.
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of cached session tokens.
pub const DEFAULT_TOKEN_CACHE_CAPACITY: usize = 1000;

/// Default share of a token's lifetime during which a cached copy is reused.
pub const DEFAULT_RENEWAL_THRESHOLD_PERCENT: u8 = 60;

/// Ceiling on every configured duration (100 years). Deadlines and validity
/// windows are computed by adding these to clock readings.
pub const MAX_CONFIGURED_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is outside its accepted range
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    /// Reject `field` with a reason.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { field, reason: reason.into() }
    }

    /// Require `value` to be positive and at most [`MAX_CONFIGURED_DURATION`].
    pub fn check_duration(field: &'static str, value: Duration) -> Result<(), Self> {
        if value.is_zero() {
            return Err(Self::invalid(field, "must be positive"));
        }
        if value > MAX_CONFIGURED_DURATION {
            return Err(Self::invalid(
                field,
                format!("{value:?} exceeds {MAX_CONFIGURED_DURATION:?}"),
            ));
        }
        Ok(())
    }
}

/// Negotiation state store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of in-progress negotiations kept
    pub max_entries: usize,
    /// Lifetime of an incomplete negotiation, measured from its creation
    pub negotiation_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_PENDING_NEGOTIATIONS,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
        }
    }
}

impl StoreConfig {
    /// Reject zero capacity and a zero or unbounded timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::invalid("max_entries", "must be at least 1"));
        }
        ConfigError::check_duration("negotiation_timeout", self.negotiation_timeout)
    }
}

/// Security token cache configuration.
#[derive(Debug, Clone)]
pub struct TokenCacheConfig {
    /// Maximum number of cached tokens
    pub capacity: usize,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self { capacity: DEFAULT_TOKEN_CACHE_CAPACITY }
    }
}

impl TokenCacheConfig {
    /// Reject zero capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("capacity", "must be at least 1"));
        }
        Ok(())
    }
}

/// When a cached issued token may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachingPolicy {
    /// Percentage (1..=100) of the lifetime during which the token is reused
    pub threshold_percent: u8,
    /// Absolute cap on reuse, counted from `valid_from`; `None` is unbounded
    pub max_caching_time: Option<Duration>,
}

impl Default for CachingPolicy {
    fn default() -> Self {
        Self { threshold_percent: DEFAULT_RENEWAL_THRESHOLD_PERCENT, max_caching_time: None }
    }
}

impl CachingPolicy {
    /// Threshold must lie in 1..=100.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold_percent == 0 || self.threshold_percent > 100 {
            return Err(ConfigError::invalid(
                "threshold_percent",
                format!("{} not in 1..=100", self.threshold_percent),
            ));
        }
        Ok(())
    }
}
