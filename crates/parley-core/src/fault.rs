//! Error → wire fault mapping.
//!
//! The mapping is a lookup table keyed by [`ErrorClass`] rather than a chain
//! of conditionals, so adding a fault is a one-line change. Receiver faults
//! tell the peer the request itself was fine and a retry may succeed; sender
//! faults say the request must change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorClass, NegotiationError};

/// Which party a fault blames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// The request was bad; do not retry unchanged
    Sender,
    /// The responder could not serve the request right now; retry is
    /// appropriate
    Receiver,
}

/// Fault code: kind plus a protocol subcode such as `FailedAuthentication`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaultCode {
    /// Sender or receiver
    pub kind: FaultKind,
    /// Protocol subcode
    pub subcode: String,
}

impl FaultCode {
    /// Build a fault code.
    pub fn new(kind: FaultKind, subcode: impl Into<String>) -> Self {
        Self { kind, subcode: subcode.into() }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FaultKind::Sender => "Sender",
            FaultKind::Receiver => "Receiver",
        };
        write!(f, "{kind}/{}", self.subcode)
    }
}

/// A fault as carried in a reply envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Fault code
    pub code: FaultCode,
    /// Human-readable reason
    pub reason: String,
}

impl Fault {
    /// Build a fault.
    pub fn new(code: FaultCode, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }

    /// Whether the peer signalled that retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        self.code.kind == FaultKind::Receiver
    }
}

/// Subcode for authentication failures.
pub const FAILED_AUTHENTICATION: &str = "FailedAuthentication";
/// Subcode for credentials that could not be parsed.
pub const INVALID_SECURITY_TOKEN: &str = "InvalidSecurityToken";
/// Subcode for unknown or expired context tokens.
pub const BAD_CONTEXT_TOKEN: &str = "BadContextToken";
/// Subcode for quota exhaustion.
pub const SERVER_TOO_BUSY: &str = "ServerTooBusy";
/// Subcode for temporarily unavailable endpoints.
pub const ENDPOINT_UNAVAILABLE: &str = "EndpointUnavailable";
/// Subcode for everything without a dedicated entry.
pub const INVALID_REQUEST: &str = "InvalidRequest";

struct FaultDescriptor {
    kind: FaultKind,
    subcode: &'static str,
}

const FAULT_TABLE: &[(ErrorClass, FaultDescriptor)] = &[
    (ErrorClass::Authentication, FaultDescriptor {
        kind: FaultKind::Sender,
        subcode: FAILED_AUTHENTICATION,
    }),
    (ErrorClass::MalformedCredential, FaultDescriptor {
        kind: FaultKind::Sender,
        subcode: INVALID_SECURITY_TOKEN,
    }),
    (ErrorClass::BadContext, FaultDescriptor {
        kind: FaultKind::Sender,
        subcode: BAD_CONTEXT_TOKEN,
    }),
    (ErrorClass::Quota, FaultDescriptor { kind: FaultKind::Receiver, subcode: SERVER_TOO_BUSY }),
    (ErrorClass::EndpointUnavailable, FaultDescriptor {
        kind: FaultKind::Receiver,
        subcode: ENDPOINT_UNAVAILABLE,
    }),
];

const DEFAULT_FAULT: FaultDescriptor =
    FaultDescriptor { kind: FaultKind::Sender, subcode: INVALID_REQUEST };

/// Fault code for an error class.
pub fn fault_code_for(class: ErrorClass) -> FaultCode {
    let descriptor = FAULT_TABLE
        .iter()
        .find(|(entry, _)| *entry == class)
        .map_or(&DEFAULT_FAULT, |(_, descriptor)| descriptor);
    FaultCode::new(descriptor.kind, descriptor.subcode)
}

/// Convert an internal error into the fault sent to the peer.
///
/// A fault received from an upstream peer is passed through unchanged.
pub fn fault_for(error: &NegotiationError) -> Fault {
    if let NegotiationError::Fault(fault) = error {
        return fault.clone();
    }
    Fault::new(fault_code_for(error.class()), error.to_string())
}
