//! Backend runtime state and the hysteresis streak machine.

use std::time::{Duration, SystemTime};

use url::Url;

use super::config::Protocol;
use super::notify::HealthNotification;
use super::probe::ProbeTarget;

/// A monitored backend with its resolved probe settings and runtime
/// health state. Owned exclusively by the monitor; callers only ever see
/// notifications and `is_healthy` answers.
#[derive(Debug)]
pub(crate) struct Backend {
    pub(crate) name: String,
    pub(crate) url: Url,
    pub(crate) protocol: Protocol,
    pub(crate) timeout: Duration,
    pub(crate) accept_status_codes: Vec<String>,
    pub(crate) unhealthy_threshold: u32,
    pub(crate) healthy_threshold: u32,

    healthy: bool,
    /// Consecutive same-direction probe results: positive counts
    /// successes, negative counts failures, zero only at birth or right
    /// after a direction change.
    status_streak: i64,
}

impl Backend {
    pub(crate) fn new(
        name: String,
        url: Url,
        protocol: Protocol,
        timeout: Duration,
        accept_status_codes: Vec<String>,
        unhealthy_threshold: u32,
        healthy_threshold: u32,
    ) -> Self {
        Self {
            name,
            url,
            protocol,
            timeout,
            accept_status_codes,
            unhealthy_threshold,
            healthy_threshold,
            healthy: false,
            status_streak: 0,
        }
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub(crate) fn set_healthy(&mut self, healthy: bool) {
        self.healthy = healthy;
    }

    pub(crate) fn status_streak(&self) -> i64 {
        self.status_streak
    }

    /// Records a failed probe. Returns `(healthy, newly)` where `newly`
    /// is true exactly when this failure reached the unhealthy threshold
    /// and flipped the state.
    pub(crate) fn fail(&mut self) -> (bool, bool) {
        if self.status_streak > 0 {
            self.status_streak = 0;
        }
        self.status_streak -= 1;

        let mut newly = false;
        if self.status_streak == -i64::from(self.unhealthy_threshold) {
            self.healthy = false;
            newly = true;
        }
        (self.healthy, newly)
    }

    /// Records a successful probe. Returns `(healthy, newly)` where
    /// `newly` is true exactly when this success reached the healthy
    /// threshold and flipped the state.
    pub(crate) fn success(&mut self) -> (bool, bool) {
        if self.status_streak < 0 {
            self.status_streak = 0;
        }
        self.status_streak += 1;

        let mut newly = false;
        if self.status_streak == i64::from(self.healthy_threshold) {
            self.healthy = true;
            newly = true;
        }
        (self.healthy, newly)
    }

    /// Builds a notification for the backend's current state, stamped
    /// with the present time.
    pub(crate) fn notification(&self) -> HealthNotification {
        HealthNotification {
            name: self.name.clone(),
            url: self.url.clone(),
            healthy: self.healthy,
            timestamp: Some(SystemTime::now()),
        }
    }

    /// Builds the terminal notification emitted when the backend is
    /// removed: unhealthy, with no timestamp, signalling that its state
    /// will never change again.
    pub(crate) fn terminal_notification(&self) -> HealthNotification {
        HealthNotification {
            name: self.name.clone(),
            url: self.url.clone(),
            healthy: false,
            timestamp: None,
        }
    }

    /// Snapshot of everything a probe task needs, detached from the
    /// backend map so probes can run without holding references into it.
    pub(crate) fn probe_target(&self) -> ProbeTarget {
        ProbeTarget {
            url: self.url.clone(),
            protocol: self.protocol,
            timeout: self.timeout,
            accept_status_codes: self.accept_status_codes.clone(),
        }
    }
}
