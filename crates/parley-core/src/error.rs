//! Error types for the Parley protocol core.
//!
//! One taxonomy covers both peers: the server maps these errors to wire
//! faults through [`crate::fault_for`], the client surfaces them wrapped once
//! at the issuance boundary.

use std::time::Duration;

use parley_crypto::CryptoError;
use thiserror::Error;

use crate::fault::Fault;

/// Errors raised while negotiating, issuing or using a session token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// Peer broke the negotiation protocol (missing message, bad leg order,
    /// undecodable blob)
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An initial request named a context that already has negotiation state
    #[error("negotiation state already exists for context {context}")]
    DuplicateNegotiationState {
        /// Offending negotiation context
        context: String,
    },

    /// A continuation named a context with no negotiation state
    #[error("no negotiation state for context {context}")]
    UnknownNegotiationState {
        /// Offending negotiation context
        context: String,
    },

    /// Credential or proof verification failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Identity evidence could not be interpreted
    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    /// A capacity limit (negotiation store, concurrency cap) was hit
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The endpoint is temporarily unable to serve the request
    #[error("endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    /// Channel open/send/close failed
    #[error("transport error talking to {target}: {reason}")]
    Transport {
        /// Address being contacted
        target: String,
        /// Underlying failure
        reason: String,
    },

    /// The overall negotiation deadline passed
    #[error("negotiation timed out after {elapsed:?} ({legs_completed} legs completed)")]
    Timeout {
        /// Number of request/reply legs that finished before the deadline
        legs_completed: usize,
        /// Time spent before giving up
        elapsed: Duration,
    },

    /// Issued key size is outside the algorithm suite's range
    #[error("key size {bits} bits outside accepted range [{min}, {max}]")]
    KeySizeInvalid {
        /// Offered key size in bits
        bits: usize,
        /// Smallest accepted key size in bits
        min: usize,
        /// Largest accepted key size in bits
        max: usize,
    },

    /// Reply confirmations do not match the signatures the request carried
    #[error("signature confirmation mismatch: {0}")]
    ConfirmationMismatch(String),

    /// Reply carried confirmations although the request sent no signatures
    #[error("received {count} signature confirmations but none were expected")]
    UnexpectedConfirmations {
        /// Number of confirmations received
        count: usize,
    },

    /// A correlation-state array held two different tokens
    #[error("correlation states reference more than one token")]
    MultipleCorrelationTokens,

    /// Referenced session token is unknown or expired
    #[error("bad context token: {0}")]
    BadContextToken(String),

    /// Message could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// Peer answered with a fault
    #[error("peer fault {}: {}", .0.code, .0.reason)]
    Fault(Fault),

    /// Cryptographic operation failed for reasons other than the above
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Coarse error classes used to select a wire fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Credential or proof verification failed
    Authentication,
    /// Credential could not be parsed
    MalformedCredential,
    /// Referenced context token is unknown or expired
    BadContext,
    /// Resource exhaustion; the caller should retry later
    Quota,
    /// Endpoint temporarily unavailable; the caller should retry later
    EndpointUnavailable,
    /// Everything else
    Other,
}

impl NegotiationError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Capacity, availability and timeout failures are environmental; a
    /// protocol or authentication failure will fail again the same way.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::CapacityExceeded(_)
            | Self::EndpointUnavailable(_)
            | Self::Timeout { .. }
            | Self::Transport { .. } => true,
            Self::Fault(fault) => fault.is_retryable(),
            _ => false,
        }
    }

    /// Fault-table class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AuthenticationFailed(_) => ErrorClass::Authentication,
            Self::MalformedCredential(_) => ErrorClass::MalformedCredential,
            Self::BadContextToken(_) => ErrorClass::BadContext,
            Self::CapacityExceeded(_) => ErrorClass::Quota,
            Self::EndpointUnavailable(_) => ErrorClass::EndpointUnavailable,
            _ => ErrorClass::Other,
        }
    }
}

impl From<CryptoError> for NegotiationError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeySizeInvalid { bits, min, max } => {
                Self::KeySizeInvalid { bits, min, max }
            },
            CryptoError::ProofMismatch => Self::AuthenticationFailed(err.to_string()),
            CryptoError::InvalidCookie { .. } => Self::BadContextToken(err.to_string()),
            CryptoError::InvalidKeyLength { .. } => Self::Crypto(err.to_string()),
        }
    }
}

/// Errors from [`crate::NegotiationStateStore`] structural operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An entry for this context already exists
    #[error("duplicate negotiation context: {0}")]
    DuplicateContext(String),
}

impl From<StoreError> for NegotiationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateContext(context) => Self::DuplicateNegotiationState { context },
        }
    }
}
