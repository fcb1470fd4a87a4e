//! Monitor and backend configuration.
//!
//! `MonitorConfig` carries the monitor-wide defaults; each
//! `BackendConfig` may override the probe timeout, accepted status
//! codes and thresholds, and inherits everything it leaves unset.
//! Validation resolves a backend config into a runtime record with all
//! inherited values filled in.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use super::backend::Backend;
use super::MonitorError;

/// Probe protocol for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    Icmp,
}

/// Monitor-wide configuration.
///
/// Duration-valued options are integer seconds on the wire. The probe
/// timeout is clamped to at most two thirds of the interval so a slow
/// probe can never outlive its tick.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Consecutive failures needed to flip a backend to unhealthy.
    pub unhealthy_threshold: u32,
    /// Consecutive successes needed to flip a backend to healthy.
    pub healthy_threshold: u32,
    /// Delay between probe rounds.
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Per-probe timeout, clamped to at most `2 * interval / 3`.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Status code regex patterns accepted as healthy for HTTP probes.
    pub accept_status_codes: Vec<String>,
    /// Initial health state assigned to newly added backends.
    pub healthy_initially: bool,
    /// Enables the newly-healthy notification channel.
    pub send_new_healthy: bool,
    /// Enables the newly-unhealthy notification channel.
    pub send_new_unhealthy: bool,
    /// Backends added during startup.
    pub backends: Vec<BackendConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            accept_status_codes: vec!["2.+".to_string()],
            healthy_initially: true,
            send_new_healthy: false,
            send_new_unhealthy: false,
            backends: Vec::new(),
        }
    }
}

/// Configuration for a single backend.
///
/// `name`, `url` and `protocol` are required; every other field falls
/// back to the monitor-wide value when unset.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Unique backend name.
    pub name: String,
    /// Probe URL; host and port select the connection target.
    pub url: String,
    /// Protocol to probe the backend with.
    pub protocol: Protocol,
    #[serde(default, with = "duration_secs_opt")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub accept_status_codes: Option<Vec<String>>,
    #[serde(default)]
    pub unhealthy_threshold: Option<u32>,
    #[serde(default)]
    pub healthy_threshold: Option<u32>,
}

impl BackendConfig {
    /// Creates a backend config with no overrides.
    pub fn new(name: impl Into<String>, url: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            protocol,
            timeout: None,
            accept_status_codes: None,
            unhealthy_threshold: None,
            healthy_threshold: None,
        }
    }

    /// Validates this config and resolves it into a runtime backend,
    /// filling inherited values from the monitor-wide defaults.
    pub(crate) fn resolve(&self, defaults: &MonitorConfig) -> Result<Backend, MonitorError> {
        if self.name.is_empty() {
            return Err(MonitorError::InvalidConfig("backend name is empty".into()));
        }
        if self.url.is_empty() {
            return Err(MonitorError::InvalidConfig(format!(
                "backend {} has an empty url",
                self.name
            )));
        }

        let url = Url::parse(&self.url).map_err(|err| {
            MonitorError::InvalidConfig(format!("backend {}: invalid url: {}", self.name, err))
        })?;

        let unhealthy_threshold = self
            .unhealthy_threshold
            .unwrap_or(defaults.unhealthy_threshold);
        let healthy_threshold = self.healthy_threshold.unwrap_or(defaults.healthy_threshold);
        if unhealthy_threshold == 0 || healthy_threshold == 0 {
            return Err(MonitorError::InvalidConfig(format!(
                "backend {}: thresholds must be at least 1",
                self.name
            )));
        }

        let timeout = clamp_timeout(
            self.timeout.unwrap_or(defaults.timeout),
            defaults.interval,
            &self.name,
        );

        let accept_status_codes = self
            .accept_status_codes
            .clone()
            .unwrap_or_else(|| defaults.accept_status_codes.clone());

        Ok(Backend::new(
            self.name.clone(),
            url,
            self.protocol,
            timeout,
            accept_status_codes,
            unhealthy_threshold,
            healthy_threshold,
        ))
    }
}

/// Clamps a probe timeout to at most two thirds of the interval,
/// warning when the configured value had to be reduced.
pub(crate) fn clamp_timeout(timeout: Duration, interval: Duration, scope: &str) -> Duration {
    let ceiling = interval * 2 / 3;
    if timeout > ceiling {
        tracing::warn!(
            scope = %scope,
            timeout = ?timeout,
            interval = ?interval,
            clamped = ?ceiling,
            "Probe timeout exceeds 2/3 of the interval, clamping"
        );
        ceiling
    } else {
        timeout
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod duration_secs_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u64>::deserialize(deserializer).map(|secs| secs.map(Duration::from_secs))
    }
}
