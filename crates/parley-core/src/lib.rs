//! Parley protocol core.
//!
//! Sans-IO building blocks for negotiated security sessions: a client and a
//! server exchange request/reply legs (WS-Trust style) until they share a
//! session token, which later protects application messages.
//!
//! # Components
//!
//! - [`NegotiationStateStore`]: in-progress handshakes keyed by negotiation
//!   context, bounded and expiring
//! - [`SecurityTokenCache`]: issued session tokens keyed by context id and key
//!   generation, evicting the soonest-expiring entry when full
//! - [`SignatureConfirmationCorrelator`]: matches the signatures a request
//!   carried against the confirmations its reply echoes back
//! - [`fault_for`]: table-driven mapping from errors to wire faults
//! - [`TimeoutBudget`]: one deadline threaded through every leg of a handshake
//! - [`message`]: request/reply envelopes and their CBOR codec
//! - [`protocol`]: blob formats for the built-in negotiation protocols
//!
//! Nothing here performs I/O. Time and randomness come from an
//! [`Environment`], so the same logic runs against the system clock in
//! production and a virtual clock in simulation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod confirmation;
pub mod env;
pub mod error;
pub mod fault;
pub mod message;
pub mod protocol;
pub mod state;
pub mod store;
pub mod timeout;
pub mod token;

pub use cache::{CacheAddResult, SecurityTokenCache};
pub use config::{
    CachingPolicy, ConfigError, MAX_CONFIGURED_DURATION, StoreConfig, TokenCacheConfig,
};
pub use confirmation::{
    CorrelationState, OutgoingSignatures, SignatureConfirmationCorrelator, SignatureConfirmations,
    SignatureValue, token_from_correlation_states,
};
pub use env::Environment;
pub use error::{ErrorClass, NegotiationError, StoreError};
pub use fault::{Fault, FaultCode, FaultKind, fault_for};
pub use message::{
    CodecError, IssuedToken, MessageId, ReplyAction, ReplyEnvelope, RequestAction,
    RequestEnvelope, TokenReference, TrustVersion,
};
pub use state::{NegotiationPayload, NegotiationState, SharedNegotiationState};
pub use store::NegotiationStateStore;
pub use timeout::TimeoutBudget;
pub use token::{Claim, ClaimRight, IdentityEvidence, SessionToken};
