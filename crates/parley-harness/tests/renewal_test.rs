//! Renewal, rollover and cancellation through the token provider.

use std::{sync::Arc, time::Duration};

use parley_client::{ChallengeNegotiation, ProviderConfig, SessionTokenProvider};
use parley_core::{
    Environment, MessageId, NegotiationError, ReplyAction, RequestAction, RequestEnvelope,
    TokenReference, fault::BAD_CONTEXT_TOKEN, protocol::possession_proof,
};
use parley_crypto::SymmetricKey;
use parley_harness::{LoopbackConfig, LoopbackFactory, RecordingListener, SimEnv};
use parley_server::{
    AuthenticatorConfig, ChallengeResponse, InMemoryCredentialStore, NegotiationService,
    ServerNegotiationAuthenticator,
};

const ISSUER: &str = "urn:parley:issuer";
const TIMEOUT: Duration = Duration::from_secs(30);
const ROLLOVER: Duration = Duration::from_secs(5 * 60);

type Challenge = ChallengeResponse<InMemoryCredentialStore>;
type Provider =
    SessionTokenProvider<SimEnv, LoopbackFactory<SimEnv, Challenge>, ChallengeNegotiation>;

struct Fixture {
    env: SimEnv,
    authenticator: Arc<ServerNegotiationAuthenticator<SimEnv, Challenge>>,
    listener: Arc<RecordingListener>,
    provider: Provider,
}

fn fixture(config: AuthenticatorConfig) -> Fixture {
    let env = SimEnv::with_seed(9);
    let credential = SymmetricKey::from_slice(&[0x33; 32]);
    let credentials = InMemoryCredentialStore::new();
    credentials.insert("alice", credential.clone());

    let listener = Arc::new(RecordingListener::new());
    let protocol = ChallengeResponse::new(credentials);
    let authenticator = Arc::new(
        ServerNegotiationAuthenticator::new(env.clone(), protocol, config)
            .unwrap()
            .with_listener(Arc::clone(&listener) as _),
    );
    let factory = LoopbackFactory::new(
        NegotiationService::new(Arc::clone(&authenticator)),
        env.clone(),
        LoopbackConfig::default(),
    );
    let provider = SessionTokenProvider::new(
        env.clone(),
        factory,
        ChallengeNegotiation::new("alice", credential),
        ISSUER,
        ISSUER,
        ProviderConfig { key_rollover_interval: ROLLOVER, ..Default::default() },
    )
    .unwrap();

    Fixture { env, authenticator, listener, provider }
}

/// WHY THIS TEST IS NEEDED:
/// Messages protected with the old key can still be in flight when the key
/// is renewed. Both peers must accept the previous generation for the
/// rollover window and only then drop it.
#[tokio::test(start_paused = true)]
async fn renewal_rolls_over_previous_key() {
    let f = fixture(AuthenticatorConfig::default());

    let token = f.provider.issue_token(TIMEOUT).await.unwrap();
    let renewed = f.provider.renew_token(&token, TIMEOUT).await.unwrap();

    assert_eq!(renewed.context_id(), token.context_id());
    assert_ne!(renewed.key_generation(), token.key_generation());
    assert_ne!(renewed.key(), token.key());

    let renewals = f.listener.renewed();
    assert_eq!(renewals.len(), 1);
    assert_eq!(renewals[0].0.key_generation(), renewed.key_generation());
    assert_eq!(renewals[0].1.key_generation(), token.key_generation());

    let cache = f.authenticator.cache();
    let now = f.env.wall_clock();
    let issuer_copy = cache.get(renewed.context_id(), renewed.key_generation(), now).unwrap();
    assert_eq!(issuer_copy.key(), renewed.key());
    assert!(cache.get(token.context_id(), token.key_generation(), now).is_some());
    assert_eq!(f.provider.incoming_tokens(now).len(), 2);
    assert!(Arc::ptr_eq(&f.provider.current_token().unwrap(), &renewed));

    f.env.sleep(ROLLOVER + Duration::from_secs(1)).await;

    let now = f.env.wall_clock();
    assert!(cache.get(token.context_id(), token.key_generation(), now).is_none());
    assert!(cache.get(renewed.context_id(), renewed.key_generation(), now).is_some());
    let incoming = f.provider.incoming_tokens(now);
    assert_eq!(incoming.len(), 1);
    assert!(Arc::ptr_eq(&incoming[0], &renewed));
}

#[tokio::test(start_paused = true)]
async fn cookie_mode_renews_without_issuer_cache() {
    let f = fixture(AuthenticatorConfig { cookie_mode: true, ..Default::default() });

    let token = f.provider.issue_token(TIMEOUT).await.unwrap();
    assert!(token.is_cookie_mode());
    assert_eq!(f.authenticator.cache().len(), 0);

    let renewed = f.provider.renew_token(&token, TIMEOUT).await.unwrap();
    assert!(renewed.is_cookie_mode());
    assert_eq!(renewed.context_id(), token.context_id());
    assert_eq!(f.authenticator.cache().len(), 0);
    assert_eq!(f.listener.renewed().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_token_cannot_be_renewed() {
    let f = fixture(AuthenticatorConfig::default());
    let token = f.provider.issue_token(TIMEOUT).await.unwrap();

    let message_id = MessageId::random(&f.env);
    let mut cancel =
        RequestEnvelope::new(message_id, ISSUER, "urn:client", RequestAction::Cancel, Vec::new());
    cancel.token_ref = Some(TokenReference {
        context_id: token.context_id().to_string(),
        key_generation: token.key_generation().to_string(),
        cookie: None,
    });
    cancel.proof = Some(possession_proof(token.key(), message_id).to_vec());

    let reply = f.authenticator.process_message(&cancel, None);
    assert_eq!(reply.action, ReplyAction::Cancel);
    assert_eq!(reply.confirmations.len(), 1);
    assert_eq!(f.authenticator.cache().len(), 0);

    let err = f.provider.renew_token(&token, TIMEOUT).await.unwrap_err();
    let NegotiationError::Fault(fault) = &err.source else {
        panic!("expected fault, got {err}");
    };
    assert_eq!(fault.code.subcode, BAD_CONTEXT_TOKEN);
}

#[tokio::test(start_paused = true)]
async fn local_cancel_forces_fresh_negotiation() {
    let f = fixture(AuthenticatorConfig::default());
    let token = f.provider.issue_token(TIMEOUT).await.unwrap();

    assert!(f.provider.cancel_token(&token));
    assert!(!f.provider.cancel_token(&token));
    assert!(f.provider.current_token().is_none());
    assert_eq!(f.authenticator.cache().len(), 1, "cancel does not contact the issuer");

    let next = f.provider.issue_token(TIMEOUT).await.unwrap();
    assert_ne!(next.context_id(), token.context_id());
    assert_eq!(f.provider.driver().factory().stats().requests, 4);
}

#[tokio::test(start_paused = true)]
async fn provider_renews_once_threshold_passes() {
    let f = fixture(AuthenticatorConfig::default());
    let token = f.provider.token(TIMEOUT).await.unwrap();
    assert!(!f.provider.needs_renewal(f.env.wall_clock()));

    let same = f.provider.token(TIMEOUT).await.unwrap();
    assert!(Arc::ptr_eq(&token, &same));

    f.env.sleep(Duration::from_secs(6 * 3600 + 1)).await;
    assert!(f.provider.needs_renewal(f.env.wall_clock()));

    let renewed = f.provider.token(TIMEOUT).await.unwrap();
    assert_eq!(renewed.context_id(), token.context_id());
    assert_ne!(renewed.key_generation(), token.key_generation());
    assert_eq!(f.listener.renewed().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn expired_token_is_reissued() {
    let f = fixture(AuthenticatorConfig::default());
    let token = f.provider.token(TIMEOUT).await.unwrap();

    f.env.sleep(Duration::from_secs(10 * 3600 + 1)).await;

    let next = f.provider.token(TIMEOUT).await.unwrap();
    assert_ne!(next.context_id(), token.context_id());
    assert!(f.listener.renewed().is_empty());
    assert_eq!(f.listener.issued().len(), 2);
}
