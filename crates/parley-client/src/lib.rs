//! Parley client.
//!
//! [`ClientIssuanceDriver`] negotiates session tokens with an issuer over any
//! [`RequestChannel`]; [`SessionTokenProvider`] is the facade applications
//! hold, adding renewal and key rollover on top.
//!
//! The negotiation protocol is pluggable through [`NegotiationStrategy`]. The
//! built-in strategies pair with the issuer-side protocols in
//! `parley-server`:
//!
//! - [`EntropyNegotiation`]: one leg, identity from the lower layer
//! - [`ChallengeNegotiation`]: two legs against a pre-shared credential
//! - [`RenewNegotiation`]: re-keys an issued token

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod channel;
mod config;
mod driver;
mod error;
mod provider;
pub mod strategy;

pub use channel::{ChannelFactory, RequestChannel};
pub use config::{
    ClientConfig, DEFAULT_KEY_RENEWAL_INTERVAL, DEFAULT_KEY_ROLLOVER_INTERVAL, ProviderConfig,
};
pub use driver::ClientIssuanceDriver;
pub use error::IssuanceError;
pub use provider::SessionTokenProvider;
pub use strategy::{
    ChallengeNegotiation, ClientNegotiationState, EntropyNegotiation, NegotiationStrategy,
    RenewNegotiation,
};
