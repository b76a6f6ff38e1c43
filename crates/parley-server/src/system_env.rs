//! Production environment using system time and OS randomness.

use std::time::{Duration, SystemTime};

use parley_core::Environment;

/// Production environment.
///
/// Uses `std::time::Instant::now()` for monotonic time, `SystemTime::now()`
/// for token validity windows, `tokio::time::sleep()` for async sleeping and
/// getrandom for context ids, entropy and nonces.
///
/// # Panics
///
/// Panics if the OS RNG fails. An issuer without working randomness would
/// hand out predictable keys.
#[derive(Clone, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn wall_clock(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable");
    }
}
