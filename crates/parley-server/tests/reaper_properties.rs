//! Property-based tests for the idle reaper.
//!
//! Drives an [`IdleSessionReaper`] the way the service's timer task does:
//! poll exactly at each deadline, record activity in between. `Duration`
//! since start stands in for the instant type.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parley_server::{IdleSessionReaper, NegotiationChannel};
use proptest::prelude::*;

const TIMEOUT: Duration = Duration::from_secs(10);

struct IdleChannel(u64);

impl NegotiationChannel for IdleChannel {
    fn id(&self) -> u64 {
        self.0
    }

    fn abort(&self) {}
}

/// One step: let time pass, then optionally touch a channel.
fn step_strategy() -> impl Strategy<Value = (u64, Option<u64>)> {
    (0u64..25, prop::option::weighted(0.7, 0u64..5))
}

/// Poll every deadline up to `until`. Returns `(channel, aborted_at)` pairs.
fn fire_until(
    reaper: &mut IdleSessionReaper<Duration>,
    until: Duration,
) -> Vec<(u64, Duration)> {
    let mut aborted = Vec::new();
    while let Some(deadline) = reaper.deadline() {
        if deadline > until {
            break;
        }
        for channel in reaper.poll(deadline) {
            aborted.push((channel.id(), deadline));
        }
    }
    aborted
}

/// Every abort must land within `[last activity + timeout, last activity +
/// 2 × timeout]`.
fn check_aborts(
    aborted: Vec<(u64, Duration)>,
    last_activity: &mut HashMap<u64, Duration>,
) -> Result<(), TestCaseError> {
    for (id, at) in aborted {
        let since = last_activity.remove(&id);
        prop_assert!(since.is_some(), "channel {id} aborted twice");
        let idle = at - since.unwrap_or_default();
        prop_assert!(idle >= TIMEOUT, "channel {id} aborted after {idle:?}");
        prop_assert!(idle <= TIMEOUT * 2, "channel {id} aborted after {idle:?}");
    }
    Ok(())
}

proptest! {
    /// Every abort lands between one and two idle periods after the
    /// channel's last activity, and every tracked channel is eventually
    /// aborted once traffic stops.
    #[test]
    fn prop_abort_within_two_periods(steps in prop::collection::vec(step_strategy(), 1..60)) {
        let mut reaper = IdleSessionReaper::<Duration>::new(TIMEOUT);
        let mut last_activity: HashMap<u64, Duration> = HashMap::new();
        let mut now = Duration::ZERO;

        for (advance, touch) in steps {
            now += Duration::from_secs(advance);
            check_aborts(fire_until(&mut reaper, now), &mut last_activity)?;

            if let Some(id) = touch {
                reaper.track(Arc::new(IdleChannel(id)), now);
                last_activity.insert(id, now);
            }
            prop_assert_eq!(reaper.len(), last_activity.len());
        }

        check_aborts(fire_until(&mut reaper, now + TIMEOUT * 3), &mut last_activity)?;
        prop_assert!(last_activity.is_empty(), "never reaped: {:?}", last_activity);
        prop_assert!(reaper.deadline().is_none());
    }

    /// Untracking a channel means it is never aborted.
    #[test]
    fn prop_untracked_channels_never_aborted(
        touches in prop::collection::vec((0u64..25, 0u64..5), 1..30),
        finished in prop::collection::hash_set(0u64..5, 0..5),
    ) {
        let mut reaper = IdleSessionReaper::<Duration>::new(TIMEOUT);
        let mut now = Duration::ZERO;

        for (advance, id) in touches {
            now += Duration::from_secs(advance);
            fire_until(&mut reaper, now);
            reaper.track(Arc::new(IdleChannel(id)), now);
        }
        for id in &finished {
            reaper.untrack(*id);
        }
        for (id, _) in fire_until(&mut reaper, now + TIMEOUT * 3) {
            prop_assert!(!finished.contains(&id), "finished channel {id} aborted");
        }
        prop_assert!(reaper.is_empty());
    }
}
