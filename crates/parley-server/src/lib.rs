//! Parley issuer.
//!
//! Server side of negotiated security sessions: the
//! [`ServerNegotiationAuthenticator`] drives multi-leg handshakes, mints and
//! caches session tokens, renews and cancels them, and maps every failure to
//! a wire fault.
//!
//! # Components
//!
//! - [`ServerNegotiationAuthenticator`]: per-request state machine (no I/O)
//! - [`EntropyExchange`], [`ChallengeResponse`]: built-in protocols
//! - [`IdleSessionReaper`]: two-generation idle channel tracker
//! - [`NegotiationService`]: byte-level endpoint with a concurrency cap
//! - [`run_idle_reaper`]: timer task for the reaper
//! - [`SystemEnv`]: production environment (system clock, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod authenticator;
mod claims;
mod config;
mod cookie;
mod error;
pub mod protocol;
mod reaper;
mod service;
mod system_env;

pub use authenticator::{IssuanceListener, ServerNegotiationAuthenticator};
pub use claims::{ClaimsResolver, CredentialStore, InMemoryClaimsResolver, InMemoryCredentialStore};
pub use config::{
    AuthenticatorConfig, DEFAULT_KEY_ROLLOVER_INTERVAL, DEFAULT_MAX_CONCURRENT_NEGOTIATIONS,
    DEFAULT_TOKEN_LIFETIME,
};
pub use error::ServerError;
pub use protocol::{ChallengeResponse, EntropyExchange, ServerNegotiationProtocol};
pub use reaper::{IdleSessionReaper, NegotiationChannel};
pub use service::{NegotiationService, run_idle_reaper};
pub use system_env::SystemEnv;
