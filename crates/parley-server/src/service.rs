//! Async service wrapper around the authenticator.
//!
//! Decodes inbound bytes, applies the concurrency cap and encodes the reply.
//! Two limits apply: requests processed at once (a semaphore) and
//! negotiations left in progress between legs. Exceeding either answers a
//! receiver `ServerTooBusy` fault so the requestor knows to retry.

use std::{sync::Arc, time::Duration};

use parley_core::{
    Environment, MessageId, NegotiationError, ReplyEnvelope, RequestAction, fault_for,
    message::{decode_request, encode_reply},
};
use tokio::sync::Semaphore;

use crate::{
    authenticator::ServerNegotiationAuthenticator,
    error::ServerError,
    protocol::ServerNegotiationProtocol,
    reaper::NegotiationChannel,
};

/// Byte-level negotiation endpoint.
pub struct NegotiationService<E: Environment, P: ServerNegotiationProtocol> {
    authenticator: Arc<ServerNegotiationAuthenticator<E, P>>,
    permits: Arc<Semaphore>,
}

impl<E: Environment, P: ServerNegotiationProtocol> Clone for NegotiationService<E, P> {
    fn clone(&self) -> Self {
        Self { authenticator: Arc::clone(&self.authenticator), permits: Arc::clone(&self.permits) }
    }
}

impl<E: Environment, P: ServerNegotiationProtocol> NegotiationService<E, P> {
    /// Wrap an authenticator, sizing the cap from its configuration.
    pub fn new(authenticator: Arc<ServerNegotiationAuthenticator<E, P>>) -> Self {
        let permits = Arc::new(Semaphore::new(authenticator.config().max_concurrent_negotiations));
        Self { authenticator, permits }
    }

    /// Wrapped authenticator.
    pub fn authenticator(&self) -> &Arc<ServerNegotiationAuthenticator<E, P>> {
        &self.authenticator
    }

    /// Handle one encoded request and return the encoded reply.
    ///
    /// # Errors
    ///
    /// Only codec failures: an undecodable request has no address to send a
    /// fault to.
    pub async fn handle(
        &self,
        bytes: &[u8],
        channel: Option<Arc<dyn NegotiationChannel>>,
    ) -> Result<Vec<u8>, ServerError> {
        let request = decode_request(bytes)?;
        let limit = self.authenticator.config().max_concurrent_negotiations;

        let permit = Arc::clone(&self.permits).try_acquire_owned();
        let over_pending = request.action == RequestAction::Issue
            && self.authenticator.pending_negotiations() >= limit;

        let reply = match permit {
            Ok(_permit) if !over_pending => {
                self.authenticator.process_message(&request, channel.as_ref())
            },
            _ => {
                let err = NegotiationError::CapacityExceeded(format!(
                    "more than {limit} negotiations in progress"
                ));
                let fault = fault_for(&err);
                tracing::warn!(
                    action = %request.action,
                    fault = %fault.code,
                    pending = self.authenticator.pending_negotiations(),
                    "rejecting negotiation request"
                );
                ReplyEnvelope::fault(&request, MessageId::random(self.authenticator.env()), fault)
            },
        };

        Ok(encode_reply(&reply)?)
    }
}

/// Drive the authenticator's idle reaper until `shutdown` resolves.
///
/// Sleeps until the reaper's deadline, or until a channel re-arms it when
/// nothing is tracked.
pub async fn run_idle_reaper<E, P>(
    authenticator: Arc<ServerNegotiationAuthenticator<E, P>>,
    shutdown: impl Future<Output = ()>,
) where
    E: Environment,
    P: ServerNegotiationProtocol,
{
    let wakeup = authenticator.reaper_wakeup();
    tokio::pin!(shutdown);

    loop {
        let wait = authenticator.idle_deadline().map(|deadline| {
            let now = authenticator.env().now();
            if deadline > now { deadline - now } else { Duration::ZERO }
        });

        let timer = async {
            match wait {
                Some(wait) => authenticator.env().sleep(wait).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = &mut shutdown => {
                tracing::debug!("idle reaper stopping");
                return;
            },
            () = wakeup.notified() => {},
            () = timer => {
                let aborted = authenticator.reap_idle();
                if aborted > 0 {
                    tracing::debug!(aborted, "idle reaper fired");
                }
            },
        }
    }
}
