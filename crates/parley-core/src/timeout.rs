//! Overall deadline for a multi-leg handshake.
//!
//! One budget is created per negotiation and threaded through every leg, so
//! the sum of per-leg allowances can never exceed the original timeout.

use std::{ops::Sub, time::Duration};

/// Remaining-time budget anchored at the start of a negotiation.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutBudget<I> {
    started: I,
    timeout: Duration,
}

impl<I> TimeoutBudget<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Start a budget of `timeout` at `now`.
    pub fn start(now: I, timeout: Duration) -> Self {
        Self { started: now, timeout }
    }

    /// The full budget.
    pub fn original(&self) -> Duration {
        self.timeout
    }

    /// Time spent so far.
    pub fn elapsed(&self, now: I) -> Duration {
        if now <= self.started { Duration::ZERO } else { now - self.started }
    }

    /// Time left; zero once the deadline has passed.
    pub fn remaining(&self, now: I) -> Duration {
        self.timeout.saturating_sub(self.elapsed(now))
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self, now: I) -> bool {
        self.remaining(now).is_zero()
    }
}
