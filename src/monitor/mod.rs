//! Backend health monitoring.
//!
//! A [`HealthMonitor`] periodically probes registered backends over
//! HTTP, HTTPS, TCP or ICMP and tracks their health with streak-based
//! hysteresis: a backend flips state only after a configured number of
//! consecutive same-direction probe results. State transitions are
//! published on opt-in notification channels.
//!
//! Probe failures are data points, not monitor faults; the monitor never
//! exits because a backend misbehaves.

mod backend;
mod config;
mod health_monitor;
mod notify;
mod probe;

pub use config::{BackendConfig, MonitorConfig, Protocol};
pub use health_monitor::HealthMonitor;
pub use notify::HealthNotification;

use thiserror::Error;

/// Errors surfaced by the health monitor.
///
/// Probe failures are deliberately absent: they are absorbed into the
/// hysteresis state machine and logged, never returned.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A notification channel was requested but not enabled at
    /// construction.
    #[error("channel not enabled")]
    ChannelNotEnabled,

    /// A notification receiver was requested a second time; each
    /// receiver can be handed out only once.
    #[error("channel receiver already taken")]
    ChannelTaken,

    /// A backend or monitor configuration failed validation. The batch
    /// that contained it was not applied.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
