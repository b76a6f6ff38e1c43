//! Authenticator and service behavior tests.
//!
//! Requests are built by hand so each test controls exactly what the issuer
//! sees, including requests no well-behaved client would send.

use std::{sync::Arc, time::Duration};

use parley_core::{
    ConfigError, Environment, MessageId, ReplyAction, ReplyEnvelope, RequestAction, RequestEnvelope,
    StoreConfig, TokenReference, TrustVersion,
    fault::{
        BAD_CONTEXT_TOKEN, FAILED_AUTHENTICATION, FaultKind, INVALID_REQUEST, SERVER_TOO_BUSY,
    },
    message::{decode_reply, encode_request},
    protocol::{ChallengeBlob, EntropyBlob, RenewBlob, encode_blob, possession_proof},
};
use parley_crypto::SymmetricKey;
use parley_harness::SimEnv;
use parley_server::{
    AuthenticatorConfig, ChallengeResponse, EntropyExchange, InMemoryClaimsResolver,
    InMemoryCredentialStore, NegotiationService, ServerError, ServerNegotiationAuthenticator,
};

const ISSUER: &str = "urn:parley:issuer";
const CLIENT: &str = "urn:parley:client";

type EntropyIssuer =
    ServerNegotiationAuthenticator<SimEnv, EntropyExchange<InMemoryClaimsResolver>>;
type ChallengeIssuer =
    ServerNegotiationAuthenticator<SimEnv, ChallengeResponse<InMemoryCredentialStore>>;

fn entropy_issuer(config: AuthenticatorConfig) -> EntropyIssuer {
    let resolver = InMemoryClaimsResolver::new().allow_anonymous();
    let protocol = EntropyExchange::new(resolver);
    ServerNegotiationAuthenticator::new(SimEnv::with_seed(3), protocol, config).unwrap()
}

fn challenge_issuer(config: AuthenticatorConfig) -> ChallengeIssuer {
    let credentials = InMemoryCredentialStore::new();
    credentials.insert("alice", SymmetricKey::from_slice(&[0x61; 32]));
    let protocol = ChallengeResponse::new(credentials);
    ServerNegotiationAuthenticator::new(SimEnv::with_seed(4), protocol, config).unwrap()
}

fn request<E: Environment>(env: &E, action: RequestAction, blob: Vec<u8>) -> RequestEnvelope {
    RequestEnvelope::new(MessageId::random(env), ISSUER, CLIENT, action, blob)
}

fn entropy_issue<E: Environment>(env: &E) -> RequestEnvelope {
    let blob = encode_blob(&EntropyBlob::Request { entropy: vec![7; 32] }).unwrap();
    request(env, RequestAction::Issue, blob)
}

fn hello<E: Environment>(env: &E, context: &str) -> RequestEnvelope {
    let blob = encode_blob(&ChallengeBlob::Hello {
        principal: "alice".to_string(),
        client_nonce: vec![1; 32],
    })
    .unwrap();
    let mut hello = request(env, RequestAction::Issue, blob);
    hello.context = Some(context.to_string());
    hello
}

/// Renew or cancel `reply`'s issued token, proving possession with `key`.
fn token_request<E: Environment>(
    env: &E,
    action: RequestAction,
    issued: &ReplyEnvelope,
    key: Option<&SymmetricKey>,
) -> RequestEnvelope {
    let issued = issued.issued.as_ref().unwrap();
    let blob = match action {
        RequestAction::Renew => encode_blob(&RenewBlob { entropy: vec![9; 32] }).unwrap(),
        _ => Vec::new(),
    };
    let mut req = request(env, action, blob);
    req.token_ref = Some(TokenReference {
        context_id: issued.context_id.clone(),
        key_generation: issued.key_generation.clone(),
        cookie: issued.cookie.clone(),
    });
    req.proof = key.map(|key| possession_proof(key, req.message_id).to_vec());
    req
}

fn fault_subcode(reply: &ReplyEnvelope) -> &str {
    assert_eq!(reply.action, ReplyAction::Fault);
    &reply.fault.as_ref().unwrap().code.subcode
}

/// Issue an entropy token and return the reply plus the key the issuer
/// cached for it.
fn issue(issuer: &EntropyIssuer) -> (ReplyEnvelope, SymmetricKey) {
    let reply = issuer.process_message(&entropy_issue(issuer.env()), None);
    let issued = reply.issued.as_ref().unwrap();
    let now = issuer.env().wall_clock();
    let token = issuer.cache().get(&issued.context_id, &issued.key_generation, now).unwrap();
    let key = token.key().clone();
    (reply, key)
}

#[test]
fn entropy_issue_completes_in_one_leg() {
    let issuer = entropy_issuer(AuthenticatorConfig::default());

    let req = entropy_issue(issuer.env());
    let reply = issuer.process_message(&req, None);

    assert_eq!(reply.relates_to, req.message_id);
    assert_eq!(reply.action, ReplyAction::IssueFinal);
    assert!(reply.complete);
    let issued = reply.issued.as_ref().unwrap();
    assert_eq!(reply.context.as_deref(), Some(issued.context_id.as_str()));
    assert_eq!(issued.key_bits, issuer.config().suite.default_key_bits());
    assert_eq!(issuer.cache().len(), 1);
    assert_eq!(issuer.pending_negotiations(), 0);
}

#[test]
fn feb2005_final_leg_answers_plain_issue() {
    let config = AuthenticatorConfig { trust_version: TrustVersion::Feb2005, ..Default::default() };
    let issuer = entropy_issuer(config);

    let reply = issuer.process_message(&entropy_issue(issuer.env()), None);

    assert_eq!(reply.action, ReplyAction::Issue);
    assert!(reply.complete);
    assert!(reply.issued.is_some());
}

#[test]
fn intermediate_leg_is_not_final() {
    let issuer = challenge_issuer(AuthenticatorConfig::default());

    let reply = issuer.process_message(&hello(issuer.env(), "urn:ctx:1"), None);

    assert_eq!(reply.action, ReplyAction::Issue);
    assert!(!reply.complete);
    assert!(reply.issued.is_none());
    assert_eq!(reply.context.as_deref(), Some("urn:ctx:1"));
    assert!(issuer.has_negotiation("urn:ctx:1"));
}

/// WHY THIS TEST IS NEEDED:
/// A replayed first leg must not reset a handshake in progress. The second
/// `Issue` for the same context is refused and the original state survives.
#[test]
fn duplicate_context_is_refused_and_original_survives() {
    let issuer = challenge_issuer(AuthenticatorConfig::default());
    issuer.process_message(&hello(issuer.env(), "urn:ctx:1"), None);

    let reply = issuer.process_message(&hello(issuer.env(), "urn:ctx:1"), None);

    assert_eq!(fault_subcode(&reply), INVALID_REQUEST);
    assert!(issuer.has_negotiation("urn:ctx:1"));
    assert_eq!(issuer.pending_negotiations(), 1);
}

#[test]
fn continuation_for_unknown_context_is_refused() {
    let issuer = challenge_issuer(AuthenticatorConfig::default());
    let proof = ChallengeBlob::Proof { proof: vec![0; 32], client_entropy: vec![0; 32] };
    let blob = encode_blob(&proof).unwrap();
    let mut req = request(issuer.env(), RequestAction::IssueContinue, blob);
    req.context = Some("urn:ctx:missing".to_string());

    let reply = issuer.process_message(&req, None);

    assert_eq!(fault_subcode(&reply), INVALID_REQUEST);
    assert_eq!(reply.fault.as_ref().unwrap().code.kind, FaultKind::Sender);
}

#[test]
fn full_store_evicts_oldest_negotiation() {
    let config = AuthenticatorConfig {
        store: StoreConfig { max_entries: 2, ..Default::default() },
        max_concurrent_negotiations: 2,
        ..Default::default()
    };
    let issuer = challenge_issuer(config);

    for context in ["urn:ctx:a", "urn:ctx:b", "urn:ctx:c"] {
        let reply = issuer.process_message(&hello(issuer.env(), context), None);
        assert!(!reply.is_fault());
    }

    assert!(!issuer.has_negotiation("urn:ctx:a"));
    assert!(issuer.has_negotiation("urn:ctx:b"));
    assert!(issuer.has_negotiation("urn:ctx:c"));
    assert_eq!(issuer.pending_negotiations(), 2);
}

#[test]
fn renew_without_proof_fails_authentication() {
    let issuer = entropy_issuer(AuthenticatorConfig::default());
    let (issued, _) = issue(&issuer);

    let reply = issuer.process_message(
        &token_request(issuer.env(), RequestAction::Renew, &issued, None),
        None,
    );

    assert_eq!(fault_subcode(&reply), FAILED_AUTHENTICATION);
    assert_eq!(issuer.cache().len(), 1);
}

#[test]
fn renew_with_foreign_key_fails_authentication() {
    let issuer = entropy_issuer(AuthenticatorConfig::default());
    let (issued, _) = issue(&issuer);
    let foreign = SymmetricKey::from_slice(&[0xee; 32]);

    let reply = issuer.process_message(
        &token_request(issuer.env(), RequestAction::Renew, &issued, Some(&foreign)),
        None,
    );

    assert_eq!(fault_subcode(&reply), FAILED_AUTHENTICATION);
}

#[test]
fn renew_confirms_proof_and_keeps_previous_generation() {
    let issuer = entropy_issuer(AuthenticatorConfig::default());
    let (issued, key) = issue(&issuer);
    let req = token_request(issuer.env(), RequestAction::Renew, &issued, Some(&key));

    let reply = issuer.process_message(&req, None);

    assert_eq!(reply.action, ReplyAction::Renew);
    assert_eq!(reply.confirmations.len(), 1);
    let previous = issued.issued.as_ref().unwrap();
    let renewed = reply.issued.as_ref().unwrap();
    assert_eq!(renewed.context_id, previous.context_id);
    assert_ne!(renewed.key_generation, previous.key_generation);
    assert_eq!(issuer.cache().len(), 2);
}

/// WHY THIS TEST IS NEEDED:
/// Once a context has been renewed, its previous generation is kept only so
/// in-flight messages still verify. Renewing from it again must fail, or a
/// leaked old key could keep minting fresh generations.
#[test]
fn superseded_generation_cannot_be_renewed() {
    let issuer = entropy_issuer(AuthenticatorConfig::default());
    let (issued, key) = issue(&issuer);

    let first = token_request(issuer.env(), RequestAction::Renew, &issued, Some(&key));
    let renewed = issuer.process_message(&first, None);
    assert_eq!(renewed.action, ReplyAction::Renew);

    let again = token_request(issuer.env(), RequestAction::Renew, &issued, Some(&key));
    let reply = issuer.process_message(&again, None);
    assert_eq!(fault_subcode(&reply), BAD_CONTEXT_TOKEN);
    assert_eq!(issuer.cache().len(), 2);

    let generation = renewed.issued.as_ref().unwrap();
    let now = issuer.env().wall_clock();
    let latest =
        issuer.cache().get(&generation.context_id, &generation.key_generation, now).unwrap();
    let renew_latest =
        token_request(issuer.env(), RequestAction::Renew, &renewed, Some(latest.key()));
    assert_eq!(issuer.process_message(&renew_latest, None).action, ReplyAction::Renew);

    let cancel = token_request(issuer.env(), RequestAction::Cancel, &issued, Some(&key));
    assert_eq!(issuer.process_message(&cancel, None).action, ReplyAction::Cancel);
    assert_eq!(issuer.cache().len(), 0);
}

#[test]
fn unbounded_token_lifetime_is_refused_at_construction() {
    let config = AuthenticatorConfig {
        token_lifetime: Duration::MAX,
        key_rollover_interval: Duration::from_secs(60),
        ..Default::default()
    };
    let protocol = EntropyExchange::new(InMemoryClaimsResolver::new().allow_anonymous());

    let result = ServerNegotiationAuthenticator::new(SimEnv::with_seed(5), protocol, config);
    assert!(matches!(result, Err(ConfigError::Invalid { field: "token_lifetime", .. })));
}

/// WHY THIS TEST IS NEEDED:
/// Cancel must revoke every generation of the context at once. A later
/// renewal against any of them is answered with `BadContextToken`.
#[test]
fn cancelled_context_cannot_be_renewed() {
    let issuer = entropy_issuer(AuthenticatorConfig::default());
    let (issued, key) = issue(&issuer);

    let cancel = token_request(issuer.env(), RequestAction::Cancel, &issued, Some(&key));
    let reply = issuer.process_message(&cancel, None);
    assert_eq!(reply.action, ReplyAction::Cancel);
    assert_eq!(reply.confirmations.len(), 1);
    assert_eq!(issuer.cache().len(), 0);

    let renew = token_request(issuer.env(), RequestAction::Renew, &issued, Some(&key));
    let reply = issuer.process_message(&renew, None);
    assert_eq!(fault_subcode(&reply), BAD_CONTEXT_TOKEN);
}

#[test]
fn cookie_token_renews_from_its_cookie() {
    let config = AuthenticatorConfig { cookie_mode: true, ..Default::default() };
    let issuer = entropy_issuer(config);

    let reply = issuer.process_message(&entropy_issue(issuer.env()), None);
    let issued = reply.issued.as_ref().unwrap();
    assert!(issued.cookie.is_some());
    assert_eq!(issuer.cache().len(), 0);

    let mut forged = reply.clone();
    if let Some(cookie) = forged.issued.as_mut().and_then(|i| i.cookie.as_mut()) {
        cookie[0] ^= 0xff;
    }
    let any_key = SymmetricKey::from_slice(&[0; 32]);
    let renew = token_request(issuer.env(), RequestAction::Renew, &forged, Some(&any_key));
    assert_eq!(fault_subcode(&issuer.process_message(&renew, None)), BAD_CONTEXT_TOKEN);
}

#[tokio::test]
async fn undecodable_bytes_are_codec_errors() {
    let issuer = entropy_issuer(AuthenticatorConfig::default());
    let service = NegotiationService::new(Arc::new(issuer));

    let err = service.handle(&[0xff, 0x00, 0x13], None).await.unwrap_err();

    assert!(matches!(err, ServerError::Codec(_)));
}

#[tokio::test]
async fn pending_negotiations_at_limit_answer_server_too_busy() {
    let config = AuthenticatorConfig { max_concurrent_negotiations: 1, ..Default::default() };
    let service = NegotiationService::new(Arc::new(challenge_issuer(config)));
    let env = service.authenticator().env().clone();

    let first = encode_request(&hello(&env, "urn:ctx:1")).unwrap();
    let reply = decode_reply(&service.handle(&first, None).await.unwrap()).unwrap();
    assert!(!reply.is_fault());

    let second = encode_request(&hello(&env, "urn:ctx:2")).unwrap();
    let reply = decode_reply(&service.handle(&second, None).await.unwrap()).unwrap();

    assert_eq!(fault_subcode(&reply), SERVER_TOO_BUSY);
    let fault = reply.fault.as_ref().unwrap();
    assert_eq!(fault.code.kind, FaultKind::Receiver);
    assert!(fault.is_retryable());
    assert!(!service.authenticator().has_negotiation("urn:ctx:2"));
}
