//! Server error types.
//!
//! Negotiation failures never surface here: the authenticator turns them into
//! fault replies. These errors cover what happens around it, when no reply
//! can be addressed at all.

use parley_core::message::CodecError;
use thiserror::Error;

/// Errors from the negotiation service wrapper.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Inbound bytes were not a request envelope, or a reply failed to encode
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}
