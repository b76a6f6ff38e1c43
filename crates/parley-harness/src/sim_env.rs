//! Simulation environment on tokio's pausable clock.
//!
//! Under `#[tokio::test(start_paused = true)]` time only moves when every
//! task is idle, so timeouts, reaper periods and token lifetimes play out
//! instantly and in the same order on every run. Randomness comes from a
//! seeded `ChaCha20` RNG shared by all clones.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, SystemTime},
};

use parley_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Wall-clock time at simulation start (2023-11-14T22:13:20Z).
const SIM_EPOCH_SECS: u64 = 1_700_000_000;

/// Deterministic environment for tests and simulations.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    origin: tokio::time::Instant,
    epoch: SystemTime,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment seeded with zero.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a specific RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            origin: tokio::time::Instant::now(),
            epoch: SystemTime::UNIX_EPOCH + Duration::from_secs(SIM_EPOCH_SECS),
        }
    }

    /// Simulated time since this environment was created.
    pub fn elapsed(&self) -> Duration {
        tokio::time::Instant::now() - self.origin
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("elapsed", &self.elapsed()).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn wall_clock(&self) -> SystemTime {
        self.epoch + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
