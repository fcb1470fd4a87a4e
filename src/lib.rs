//! Maglev-style layer-4 load-balancing core.
//!
//! Answers one question at wire speed: given a packet identified by its
//! 5-tuple, which backend should receive it? Three pieces cooperate:
//!
//! - [`hash::fingerprint`] turns a 5-tuple into a deterministic 32-bit key.
//! - [`hash::ConsistentHash`] maps keys to backend names through a
//!   precomputed Maglev lookup table with minimal remapping on churn.
//! - [`monitor::HealthMonitor`] probes backends over HTTP/HTTPS/TCP/ICMP
//!   and publishes health transitions with streak-based hysteresis.
//!
//! [`Balancer`] wires them together: health transitions drive table
//! membership, so `backend_for` only ever returns currently-healthy
//! backends.

pub mod balancer;
pub mod hash;
pub mod monitor;

pub use balancer::Balancer;
pub use hash::{fingerprint, ConsistentHash, LARGE_SIZE, SMALL_SIZE};
pub use monitor::{
    BackendConfig, HealthMonitor, HealthNotification, MonitorConfig, MonitorError, Protocol,
};
