//! Per-context negotiation state.
//!
//! A [`NegotiationState`] is owned by exactly one handshake. The
//! protocol-specific part lives in a payload `T` that the store never looks
//! at; the store only moves `Arc`s around. Progress is mutated under the
//! state's own mutex, never while the store lock is held.

use std::sync::{Arc, Mutex};

use crate::{error::NegotiationError, token::SessionToken};

/// Protocol-specific negotiation payload.
///
/// `dispose` must release anything sensitive the payload holds (entropy,
/// nonces, intermediate keys). It is called exactly once, when the
/// negotiation completes, fails or is evicted.
pub trait NegotiationPayload: Send {
    /// Zero key material and release resources.
    fn dispose(&mut self) {}
}

/// In-progress negotiation for one context.
#[derive(Debug)]
pub struct NegotiationState<T: NegotiationPayload> {
    context: String,
    target: String,
    remote: String,
    payload: T,
    token: Option<Arc<SessionToken>>,
    disposed: bool,
}

/// Negotiation state shared between the store and the handshake driving it.
pub type SharedNegotiationState<T> = Arc<Mutex<NegotiationState<T>>>;

impl<T: NegotiationPayload> NegotiationState<T> {
    /// New, incomplete state.
    pub fn new(
        context: impl Into<String>,
        target: impl Into<String>,
        remote: impl Into<String>,
        payload: T,
    ) -> Self {
        Self {
            context: context.into(),
            target: target.into(),
            remote: remote.into(),
            payload,
            token: None,
            disposed: false,
        }
    }

    /// Wrap in the shared form the store holds.
    pub fn into_shared(self) -> SharedNegotiationState<T> {
        Arc::new(Mutex::new(self))
    }

    /// Negotiation context.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Address the negotiation was directed at.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Address of the remote peer.
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Protocol payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Mutable protocol payload.
    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    /// Mark the negotiation complete with its resulting token.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if the state is already complete or disposed. The
    /// service token never changes once set.
    pub fn set_completed(&mut self, token: Arc<SessionToken>) -> Result<(), NegotiationError> {
        if self.disposed {
            return Err(NegotiationError::ProtocolViolation(format!(
                "negotiation {} already disposed",
                self.context
            )));
        }
        if self.token.is_some() {
            return Err(NegotiationError::ProtocolViolation(format!(
                "negotiation {} already completed",
                self.context
            )));
        }
        self.token = Some(token);
        Ok(())
    }

    /// Whether a service token has been produced.
    pub fn is_completed(&self) -> bool {
        self.token.is_some()
    }

    /// Service token, present iff complete.
    pub fn service_token(&self) -> Option<&Arc<SessionToken>> {
        self.token.as_ref()
    }

    /// Whether [`Self::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release payload resources. Idempotent.
    pub fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.payload.dispose();
        }
    }
}

impl<T: NegotiationPayload> Drop for NegotiationState<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}
