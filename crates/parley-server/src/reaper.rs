//! Idle negotiation channel reaper.
//!
//! Two generations of channels instead of per-channel timestamps. Every
//! timer period the `aging` generation is aborted and `active` becomes the
//! new `aging`. Activity moves a channel back to `active`. A channel idle
//! since `T` is therefore aborted in `[T + timeout, T + 2 × timeout]`.
//!
//! The reaper is sans-IO: [`IdleSessionReaper::poll`] returns the channels to
//! abort and [`IdleSessionReaper::deadline`] says when to poll next. The
//! timer is disarmed whenever both generations are empty.

use std::{
    collections::HashMap,
    ops::Add,
    sync::Arc,
    time::Duration,
};

use parley_core::MAX_CONFIGURED_DURATION;

/// Inbound session channel that can be torn down.
pub trait NegotiationChannel: Send + Sync {
    /// Stable channel identifier.
    fn id(&self) -> u64;

    /// Tear the channel down without a graceful close.
    fn abort(&self);
}

/// Two-generation idle tracker.
pub struct IdleSessionReaper<I> {
    timeout: Duration,
    active: HashMap<u64, Arc<dyn NegotiationChannel>>,
    aging: HashMap<u64, Arc<dyn NegotiationChannel>>,
    next_fire: Option<I>,
}

impl<I> IdleSessionReaper<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Reaper firing every `timeout`, capped at [`MAX_CONFIGURED_DURATION`].
    pub fn new(timeout: Duration) -> Self {
        let timeout = timeout.min(MAX_CONFIGURED_DURATION);
        Self { timeout, active: HashMap::new(), aging: HashMap::new(), next_fire: None }
    }

    /// Record activity on a channel. Arms the timer if it was idle.
    pub fn track(&mut self, channel: Arc<dyn NegotiationChannel>, now: I) {
        let id = channel.id();
        self.aging.remove(&id);
        self.active.insert(id, channel);
        if self.next_fire.is_none() {
            self.next_fire = Some(now + self.timeout);
        }
    }

    /// Forget a channel that finished gracefully. Returns whether it was
    /// tracked.
    pub fn untrack(&mut self, id: u64) -> bool {
        let removed = self.active.remove(&id).is_some() | self.aging.remove(&id).is_some();
        if self.active.is_empty() && self.aging.is_empty() {
            self.next_fire = None;
        }
        removed
    }

    /// When [`Self::poll`] should next run, or `None` when disarmed.
    pub fn deadline(&self) -> Option<I> {
        self.next_fire
    }

    /// Fire the timer if due. Returns the channels to abort.
    pub fn poll(&mut self, now: I) -> Vec<Arc<dyn NegotiationChannel>> {
        match self.next_fire {
            Some(fire) if fire <= now => {},
            _ => return Vec::new(),
        }

        let expired: Vec<_> = self.aging.drain().map(|(_, channel)| channel).collect();
        std::mem::swap(&mut self.active, &mut self.aging);

        self.next_fire = if self.aging.is_empty() { None } else { Some(now + self.timeout) };
        expired
    }

    /// Channels currently tracked.
    pub fn len(&self) -> usize {
        self.active.len() + self.aging.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
