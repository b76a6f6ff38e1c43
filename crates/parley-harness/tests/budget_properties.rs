//! Property-based tests for the per-negotiation timeout budget.
//!
//! A two-leg challenge handshake runs over a loopback channel with fixed
//! latency on tokio's paused clock, so elapsed time is exact and the
//! outcome is a pure function of latency and budget.

use std::{sync::Arc, time::Duration};

use parley_client::{ChallengeNegotiation, ClientConfig, ClientIssuanceDriver};
use parley_core::NegotiationError;
use parley_crypto::SymmetricKey;
use parley_harness::{ChannelStats, LoopbackConfig, LoopbackFactory, SimEnv};
use parley_server::{
    AuthenticatorConfig, ChallengeResponse, InMemoryCredentialStore, NegotiationService,
    ServerNegotiationAuthenticator,
};
use proptest::prelude::*;

const ISSUER: &str = "urn:parley:issuer";
const LEGS: u64 = 2;

/// Outcome of one handshake: legs completed on timeout (or `None` on
/// success) plus the channel counters.
fn run_handshake(seed: u64, latency: Duration, budget: Duration) -> (Option<usize>, ChannelStats) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();

    runtime.block_on(async {
        let env = SimEnv::with_seed(seed);
        let credential = SymmetricKey::from_slice(&[0x21; 32]);
        let credentials = InMemoryCredentialStore::new();
        credentials.insert("alice", credential.clone());

        let protocol = ChallengeResponse::new(credentials);
        let authenticator = ServerNegotiationAuthenticator::new(
            env.clone(),
            protocol,
            AuthenticatorConfig::default(),
        )
        .unwrap();
        let service = NegotiationService::new(Arc::new(authenticator));
        let loopback = LoopbackConfig { latency, ..Default::default() };
        let factory = LoopbackFactory::new(service, env.clone(), loopback);
        let driver = ClientIssuanceDriver::new(env, factory, ClientConfig::default()).unwrap();

        let alice = ChallengeNegotiation::new("alice", credential);
        let outcome = match driver.negotiate(&alice, ISSUER, ISSUER, budget).await {
            Ok(_) => None,
            Err(err) => match err.source {
                NegotiationError::Timeout { legs_completed, .. } => Some(legs_completed),
                other => panic!("unexpected failure: {other}"),
            },
        };
        (outcome, driver.factory().stats())
    })
}

proptest! {
    /// Each leg is offered exactly the budget left after the legs before it.
    #[test]
    fn prop_leg_timeouts_shrink_by_elapsed_latency(
        seed in any::<u64>(),
        latency_ms in 1u64..2_000,
        slack_ms in 1u64..10_000,
    ) {
        let latency = Duration::from_millis(latency_ms);
        let budget = latency * LEGS as u32 + Duration::from_millis(slack_ms);

        let (outcome, stats) = run_handshake(seed, latency, budget);

        prop_assert_eq!(outcome, None);
        prop_assert_eq!(stats.request_timeouts.len(), LEGS as usize);
        for (leg, offered) in stats.request_timeouts.iter().enumerate() {
            prop_assert_eq!(*offered + latency * leg as u32, budget);
        }
    }

    /// A budget that runs out mid-handshake reports how many legs finished.
    #[test]
    fn prop_timeout_reports_completed_legs(
        seed in any::<u64>(),
        latency_ms in 2u64..2_000,
        finished in 0u64..LEGS,
        offset_per_mille in 1u64..1_000,
    ) {
        let offset_ms = (latency_ms * offset_per_mille / 1_000).clamp(1, latency_ms - 1);
        let latency = Duration::from_millis(latency_ms);
        let budget = Duration::from_millis(finished * latency_ms + offset_ms);

        let (outcome, stats) = run_handshake(seed, latency, budget);

        prop_assert_eq!(outcome, Some(finished as usize));
        prop_assert_eq!(stats.requests, finished as usize + 1);
        prop_assert_eq!(stats.aborted, 1);
        prop_assert_eq!(stats.closed, 0);
    }
}
