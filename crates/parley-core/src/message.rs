//! Request/reply envelopes and their CBOR codec.
//!
//! Envelopes carry addressing (message id, destination, reply address), a
//! typed action and an opaque negotiation blob owned by the protocol in use.
//! Action URIs are only needed for display and interop logging; the typed
//! action is what travels.

use std::{fmt, time::SystemTime};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    confirmation::SignatureConfirmations,
    env::{Environment, format_urn},
    error::NegotiationError,
    fault::Fault,
    token::{Claim, IdentityEvidence},
};

/// Largest encoded envelope accepted by the codec (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Codec failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Serialization failed
    #[error("encode failed: {0}")]
    Encode(String),
    /// Input was not a valid envelope
    #[error("decode failed: {0}")]
    Decode(String),
    /// Input exceeded [`MAX_MESSAGE_SIZE`]
    #[error("message of {size} bytes exceeds limit of {max}")]
    TooLarge {
        /// Observed size
        size: usize,
        /// Limit
        max: usize,
    },
}

impl From<CodecError> for NegotiationError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Unique message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u128);

impl MessageId {
    /// Fresh random id.
    pub fn random<E: Environment>(env: &E) -> Self {
        Self(env.random_u128())
    }

    /// Big-endian bytes, used when a proof binds to the message.
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_urn(self.0))
    }
}

/// WS-Trust protocol version, which fixes action URIs and reply shapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrustVersion {
    /// WS-Trust February 2005
    Feb2005,
    /// WS-Trust 1.3
    #[default]
    WsTrust13,
}

impl TrustVersion {
    fn namespace(self) -> &'static str {
        match self {
            Self::Feb2005 => "http://schemas.xmlsoap.org/ws/2005/02/trust",
            Self::WsTrust13 => "http://docs.oasis-open.org/ws-sx/ws-trust/200512",
        }
    }

    /// Reply action for an issuance leg.
    ///
    /// Feb2005 always answers `RSTR/Issue`. 1.3 answers intermediate legs with
    /// `RSTR/Issue` and wraps the final leg in a collection
    /// (`RSTRC/IssueFinal`).
    pub fn issue_reply_action(self, complete: bool) -> ReplyAction {
        match self {
            Self::WsTrust13 if complete => ReplyAction::IssueFinal,
            _ => ReplyAction::Issue,
        }
    }

    /// Reply action a well-behaved issuer answers `request` with.
    pub fn reply_action(self, request: RequestAction, complete: bool) -> ReplyAction {
        match request {
            RequestAction::Issue | RequestAction::IssueContinue => {
                self.issue_reply_action(complete)
            },
            RequestAction::Renew => ReplyAction::Renew,
            RequestAction::Cancel => ReplyAction::Cancel,
        }
    }

    /// Action URI for a request.
    pub fn request_uri(self, action: RequestAction) -> String {
        let suffix = match action {
            RequestAction::Issue | RequestAction::IssueContinue => "RST/Issue",
            RequestAction::Renew => "RST/Renew",
            RequestAction::Cancel => "RST/Cancel",
        };
        format!("{}/{suffix}", self.namespace())
    }

    /// Action URI for a reply.
    pub fn reply_uri(self, action: ReplyAction) -> String {
        let suffix = match (self, action) {
            (_, ReplyAction::Fault) => return FAULT_ACTION.to_string(),
            (Self::WsTrust13, ReplyAction::IssueFinal) => "RSTRC/IssueFinal",
            (_, ReplyAction::Issue | ReplyAction::IssueFinal) => "RSTR/Issue",
            (_, ReplyAction::Renew) => "RSTR/Renew",
            (_, ReplyAction::Cancel) => "RSTR/Cancel",
        };
        format!("{}/{suffix}", self.namespace())
    }
}

/// WS-Addressing fault action.
pub const FAULT_ACTION: &str = "http://www.w3.org/2005/08/addressing/soap/fault";

/// What a request asks the issuer to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestAction {
    /// First leg of a new negotiation
    Issue,
    /// Later leg of an existing negotiation
    IssueContinue,
    /// Re-key an issued token
    Renew,
    /// Invalidate an issued token
    Cancel,
}

impl fmt::Display for RequestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Issue => "Issue",
            Self::IssueContinue => "IssueContinue",
            Self::Renew => "Renew",
            Self::Cancel => "Cancel",
        };
        f.write_str(name)
    }
}

/// Reply action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplyAction {
    /// Issuance reply (`RSTR/Issue`)
    Issue,
    /// Final issuance reply in collection form (`RSTRC/IssueFinal`)
    IssueFinal,
    /// Renewal reply
    Renew,
    /// Cancellation reply
    Cancel,
    /// Fault
    Fault,
}

/// Names an issued token in a renew or cancel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenReference {
    /// Context id of the token
    pub context_id: String,
    /// Key generation being renewed or cancelled
    pub key_generation: String,
    /// Cookie, for tokens issued in cookie mode
    pub cookie: Option<Vec<u8>>,
}

/// Token description returned on the final leg.
///
/// The key itself never travels; each peer derives it from the negotiation.
/// `key_bits` lets the requestor check the issuer used an acceptable size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    /// Context id
    pub context_id: String,
    /// Key generation id
    pub key_generation: String,
    /// Start of validity
    pub valid_from: SystemTime,
    /// End of validity
    pub valid_to: SystemTime,
    /// Claims the issuer attached
    pub claims: Vec<Claim>,
    /// Size of the derived key in bits
    pub key_bits: usize,
    /// Sealed token state, when issued in cookie mode
    pub cookie: Option<Vec<u8>>,
}

/// Request sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Message id
    pub message_id: MessageId,
    /// Issuer address
    pub to: String,
    /// Where replies go
    pub reply_to: String,
    /// Requested action
    pub action: RequestAction,
    /// Negotiation context; absent only on an `Issue` leg without a
    /// client-chosen context
    pub context: Option<String>,
    /// Protocol-specific negotiation blob
    pub blob: Vec<u8>,
    /// Identity evidence from the lower security layer
    pub evidence: IdentityEvidence,
    /// Token being renewed or cancelled
    pub token_ref: Option<TokenReference>,
    /// Proof of possession of the referenced token's key
    pub proof: Option<Vec<u8>>,
}

impl RequestEnvelope {
    /// Request with empty optional fields.
    pub fn new(
        message_id: MessageId,
        to: impl Into<String>,
        reply_to: impl Into<String>,
        action: RequestAction,
        blob: Vec<u8>,
    ) -> Self {
        Self {
            message_id,
            to: to.into(),
            reply_to: reply_to.into(),
            action,
            context: None,
            blob,
            evidence: IdentityEvidence::Anonymous,
            token_ref: None,
            proof: None,
        }
    }
}

/// Reply sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Message id
    pub message_id: MessageId,
    /// Id of the request this answers
    pub relates_to: MessageId,
    /// Requestor's reply address
    pub to: String,
    /// Reply action
    pub action: ReplyAction,
    /// Negotiation context
    pub context: Option<String>,
    /// Protocol-specific negotiation blob
    pub blob: Vec<u8>,
    /// Whether the issuer considers the negotiation finished
    pub complete: bool,
    /// Issued token, on the final leg
    pub issued: Option<IssuedToken>,
    /// Echo of the signatures the request carried
    pub confirmations: SignatureConfirmations,
    /// Fault, when the request failed
    pub fault: Option<Fault>,
}

impl ReplyEnvelope {
    /// Reply addressed back to `request`'s sender.
    pub fn for_request(
        request: &RequestEnvelope,
        message_id: MessageId,
        action: ReplyAction,
    ) -> Self {
        Self {
            message_id,
            relates_to: request.message_id,
            to: request.reply_to.clone(),
            action,
            context: request.context.clone(),
            blob: Vec::new(),
            complete: false,
            issued: None,
            confirmations: SignatureConfirmations::new(),
            fault: None,
        }
    }

    /// Fault reply to `request`.
    pub fn fault(request: &RequestEnvelope, message_id: MessageId, fault: Fault) -> Self {
        let mut reply = Self::for_request(request, message_id, ReplyAction::Fault);
        reply.fault = Some(fault);
        reply
    }

    /// Whether this is a fault.
    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }
}

/// Encode any serde value as CBOR.
pub fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge { size: bytes.len(), max: MAX_MESSAGE_SIZE });
    }
    Ok(bytes)
}

/// Decode a CBOR value, rejecting oversized input before parsing.
pub fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge { size: bytes.len(), max: MAX_MESSAGE_SIZE });
    }
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encode a request envelope.
pub fn encode_request(request: &RequestEnvelope) -> Result<Vec<u8>, CodecError> {
    encode_cbor(request)
}

/// Decode a request envelope.
pub fn decode_request(bytes: &[u8]) -> Result<RequestEnvelope, CodecError> {
    decode_cbor(bytes)
}

/// Encode a reply envelope.
pub fn encode_reply(reply: &ReplyEnvelope) -> Result<Vec<u8>, CodecError> {
    encode_cbor(reply)
}

/// Decode a reply envelope.
pub fn decode_reply(bytes: &[u8]) -> Result<ReplyEnvelope, CodecError> {
    decode_cbor(bytes)
}
