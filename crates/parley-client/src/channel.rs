//! Transport collaborators.
//!
//! The driver only needs request/reply semantics. Every operation takes the
//! time left in the negotiation's budget; implementations must not wait
//! longer.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::{NegotiationError, ReplyEnvelope, RequestEnvelope};

/// Request/reply channel to an issuer.
#[async_trait]
pub trait RequestChannel: Send {
    /// Open the channel.
    async fn open(&mut self, timeout: Duration) -> Result<(), NegotiationError>;

    /// Send a request and wait for its reply.
    async fn request(
        &mut self,
        request: RequestEnvelope,
        timeout: Duration,
    ) -> Result<ReplyEnvelope, NegotiationError>;

    /// Close gracefully.
    async fn close(&mut self, timeout: Duration) -> Result<(), NegotiationError>;

    /// Tear down immediately. Must not fail.
    fn abort(&mut self);
}

/// Creates channels to issuers.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Channel type produced.
    type Channel: RequestChannel;

    /// Channel addressed to `issuer`, physically connecting to `via`.
    async fn create_channel(
        &self,
        issuer: &str,
        via: &str,
    ) -> Result<Self::Channel, NegotiationError>;
}
