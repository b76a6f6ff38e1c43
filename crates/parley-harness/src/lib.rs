//! Deterministic simulation harness for Parley.
//!
//! Wires a client [`ClientIssuanceDriver`](parley_client::ClientIssuanceDriver)
//! to a server [`NegotiationService`](parley_server::NegotiationService)
//! in-process:
//!
//! - [`SimEnv`]: tokio's pausable clock plus a seeded RNG, so every run of a
//!   scenario sees the same times, nonces and keys
//! - [`LoopbackFactory`]: request channels that encode each request, apply
//!   latency and injected faults, and hand the bytes to the service
//! - [`RecordingListener`]: captures issuance and renewal notifications

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod listener;
pub mod loopback;
pub mod sim_env;

pub use listener::RecordingListener;
pub use loopback::{ChannelStats, LoopbackChannel, LoopbackConfig, LoopbackFactory};
pub use sim_env::SimEnv;
