//! Client error types.

use parley_core::NegotiationError;
use thiserror::Error;

/// A failed issuance, wrapped once at the driver boundary.
///
/// The underlying [`NegotiationError`] is preserved as the source so callers
/// can still match on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("token issuance from {target} failed after {legs_completed} legs: {source}")]
pub struct IssuanceError {
    /// Issuer address
    pub target: String,
    /// Request/reply legs completed before the failure
    pub legs_completed: usize,
    /// What went wrong
    #[source]
    pub source: NegotiationError,
}

impl IssuanceError {
    /// Wrap `source`.
    pub fn new(target: impl Into<String>, legs_completed: usize, source: NegotiationError) -> Self {
        Self { target: target.into(), legs_completed, source }
    }

    /// Returns true if retrying may succeed.
    pub fn is_transient(&self) -> bool {
        self.source.is_transient()
    }
}
