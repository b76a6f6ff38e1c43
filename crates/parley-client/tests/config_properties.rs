//! Property-based tests for client and provider configuration

use std::time::{Duration, UNIX_EPOCH};

use parley_client::{ClientConfig, ProviderConfig};
use parley_core::{MAX_CONFIGURED_DURATION, SessionToken};
use parley_crypto::SymmetricKey;
use proptest::prelude::*;

fn interval() -> impl Strategy<Value = Duration> {
    prop_oneof![
        Just(Duration::ZERO),
        Just(Duration::MAX),
        Just(MAX_CONFIGURED_DURATION),
        (1u64..1_000_000).prop_map(Duration::from_secs),
    ]
}

/// Property: a provider config validates iff the threshold is a percentage,
/// the renewal interval is positive and bounded, and rollover fits inside it
#[test]
fn prop_provider_config_validation() {
    proptest!(|(
        percent in any::<u8>(),
        renewal in interval(),
        rollover in interval(),
    )| {
        let config = ProviderConfig {
            client: ClientConfig { renewal_threshold_percent: percent, ..Default::default() },
            key_renewal_interval: renewal,
            key_rollover_interval: rollover,
        };

        let expected = (1..=100).contains(&percent)
            && !renewal.is_zero()
            && renewal <= MAX_CONFIGURED_DURATION
            && rollover <= renewal;
        prop_assert_eq!(config.validate().is_ok(), expected);
    });
}

/// Property: the renewal policy never keeps a key past the renewal interval,
/// however long the token itself lives
#[test]
fn prop_renewal_due_by_interval() {
    proptest!(|(
        lifetime_secs in 1u64..10_000_000,
        renewal_secs in 1u64..10_000_000,
        percent in 1u8..=100,
    )| {
        let config = ProviderConfig {
            client: ClientConfig { renewal_threshold_percent: percent, ..Default::default() },
            key_renewal_interval: Duration::from_secs(renewal_secs),
            key_rollover_interval: Duration::ZERO,
        };
        prop_assert!(config.validate().is_ok());

        let valid_from = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let token = SessionToken::new(
            "urn:ctx",
            "urn:gen",
            SymmetricKey::from_slice(&[0x24; 32]),
            valid_from,
            valid_from + Duration::from_secs(lifetime_secs),
            vec![],
        )
        .unwrap();

        let policy = config.renewal_policy();
        let deadline = valid_from + Duration::from_secs(renewal_secs.min(lifetime_secs));
        prop_assert!(!token.is_fresh_at(deadline + Duration::from_nanos(1), &policy));
        prop_assert!(token.is_fresh_at(valid_from, &policy));
    });
}
