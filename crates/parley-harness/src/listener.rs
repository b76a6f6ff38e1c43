//! Issuance listener that records every notification.

use std::sync::{Arc, Mutex, PoisonError};

use parley_core::SessionToken;
use parley_server::IssuanceListener;

/// Records issued and renewed tokens for assertions.
#[derive(Default)]
pub struct RecordingListener {
    issued: Mutex<Vec<Arc<SessionToken>>>,
    renewed: Mutex<Vec<(Arc<SessionToken>, Arc<SessionToken>)>>,
}

impl RecordingListener {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens reported as issued, in order.
    pub fn issued(&self) -> Vec<Arc<SessionToken>> {
        self.issued.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// `(renewed, previous)` pairs, in order.
    pub fn renewed(&self) -> Vec<(Arc<SessionToken>, Arc<SessionToken>)> {
        self.renewed.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl IssuanceListener for RecordingListener {
    fn on_token_issued(&self, token: &Arc<SessionToken>) {
        self.issued.lock().unwrap_or_else(PoisonError::into_inner).push(Arc::clone(token));
    }

    fn on_token_renewed(&self, renewed: &Arc<SessionToken>, previous: &Arc<SessionToken>) {
        self.renewed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Arc::clone(renewed), Arc::clone(previous)));
    }
}
