//! Environment abstraction for deterministic testing.
//!
//! Decouples negotiation logic from system resources (time, randomness). The
//! simulation harness plugs in a virtual clock and a seeded RNG; production
//! uses the system clock and OS entropy.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::{Duration, SystemTime},
};

/// Abstract environment providing time, randomness, and async sleeping.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant type used for timeouts and expiry.
    ///
    /// Production environments use `std::time::Instant`, simulation uses the
    /// pausable tokio clock.
    type Instant: Copy
        + Ord
        + Debug
        + Send
        + Sync
        + Sub<Output = Duration>
        + Add<Duration, Output = Self::Instant>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time.
    ///
    /// Session token validity windows are expressed in wall-clock time since
    /// they are interpreted by both peers.
    fn wall_clock(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code (deadline races, timer tasks) should await this;
    /// protocol logic takes time as a parameter instead.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random `u128`.
    ///
    /// Used for message ids and context identifiers.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }

    /// Fills a fixed-size array with random bytes.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }

    /// Fresh `urn:uuid:` identifier for contexts and key generations.
    fn new_urn(&self) -> String {
        format_urn(self.random_u128())
    }
}

/// Format a 128-bit value as a `urn:uuid:` string.
pub fn format_urn(value: u128) -> String {
    let hex = format!("{value:032x}");
    format!(
        "urn:uuid:{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
