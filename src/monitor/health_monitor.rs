//! The health monitor: periodic concurrent probing with hysteresis.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use tokio::sync::{mpsc, watch, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::backend::Backend;
use super::config::{clamp_timeout, BackendConfig, MonitorConfig};
use super::notify::{HealthNotification, OutputChannels};
use super::probe;
use super::MonitorError;

/// Periodically probes registered backends and publishes health
/// transitions.
///
/// Cheap to clone; all state is shared. Take the notification receivers
/// before calling [`start`](Self::start): the channels buffer a single
/// notification, so an undrained channel backpressures the tick task.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: MonitorConfig,
    backends: AsyncRwLock<HashMap<String, Backend>>,
    last_checked: RwLock<Option<SystemTime>>,
    channels: OutputChannels,
    shutdown: watch::Sender<bool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Creates a monitor from the given configuration.
    ///
    /// Validates the monitor-wide thresholds and interval, and clamps
    /// the monitor-wide timeout to at most `2 * interval / 3`.
    pub fn new(mut cfg: MonitorConfig) -> Result<Self, MonitorError> {
        if cfg.unhealthy_threshold == 0 || cfg.healthy_threshold == 0 {
            return Err(MonitorError::InvalidConfig(
                "thresholds must be at least 1".into(),
            ));
        }
        if cfg.interval.is_zero() {
            return Err(MonitorError::InvalidConfig(
                "interval must be positive".into(),
            ));
        }
        cfg.timeout = clamp_timeout(cfg.timeout, cfg.interval, "monitor");

        let channels = OutputChannels::new(cfg.send_new_healthy, cfg.send_new_unhealthy);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                cfg,
                backends: AsyncRwLock::new(HashMap::new()),
                last_checked: RwLock::new(None),
                channels,
                shutdown,
                ticker: Mutex::new(None),
            }),
        })
    }

    /// Starts the ticker task. Non-blocking; the first probe round runs
    /// one full interval after this call.
    ///
    /// Backends pre-loaded in the configuration are added first through
    /// the same contract as [`add`](Self::add); if any of them fails
    /// validation the monitor does not start.
    pub async fn start(&self) -> Result<(), MonitorError> {
        tracing::info!(
            interval = ?self.inner.cfg.interval,
            timeout = ?self.inner.cfg.timeout,
            backends = self.inner.cfg.backends.len(),
            "Starting health monitor"
        );

        if !self.inner.cfg.backends.is_empty() {
            let preloaded = self.inner.cfg.backends.clone();
            self.add(&preloaded).await?;
        }

        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let period = inner.cfg.interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => inner.tick().await,
                }
            }
        });
        *self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(())
    }

    /// Stops the monitor: cancels the ticker, waits for in-flight
    /// probes to drain, then closes the notification channels.
    ///
    /// The frozen backend state stays readable through
    /// [`is_healthy`](Self::is_healthy) and [`size`](Self::size).
    pub async fn stop(&self) {
        tracing::info!("Stopping health monitor");
        let _ = self.inner.shutdown.send(true);

        let handle = self
            .inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Ticker task failed");
            }
        }

        self.inner.channels.close();
    }

    /// Validates and registers the given backends.
    ///
    /// All-or-nothing: if any config fails validation, nothing is
    /// added. Names that already exist are skipped with a warning. Each
    /// newly added backend starts in the configured initial state and
    /// announces it on the matching enabled channel.
    pub async fn add(&self, configs: &[BackendConfig]) -> Result<(), MonitorError> {
        let mut resolved = Vec::with_capacity(configs.len());
        for config in configs {
            resolved.push(config.resolve(&self.inner.cfg)?);
        }

        let mut backends = self.inner.backends.write().await;
        for mut backend in resolved {
            if backends.contains_key(&backend.name) {
                tracing::warn!(backend = %backend.name, "Backend already exists");
                continue;
            }

            backend.set_healthy(self.inner.cfg.healthy_initially);
            let healthy = backend.is_healthy();
            let notification = backend.notification();
            backends.insert(backend.name.clone(), backend);

            if healthy {
                self.inner.channels.send_healthy(notification).await;
            } else {
                self.inner.channels.send_unhealthy(notification).await;
            }
        }
        Ok(())
    }

    /// Deregisters the named backends.
    ///
    /// Each removed backend emits a terminal unhealthy notification
    /// with no timestamp, regardless of its state at removal. Unknown
    /// names are ignored with a warning.
    pub async fn remove(&self, names: &[&str]) {
        let mut backends = self.inner.backends.write().await;
        for name in names {
            match backends.get(*name) {
                Some(backend) => {
                    self.inner
                        .channels
                        .send_unhealthy(backend.terminal_notification())
                        .await;
                    backends.remove(*name);
                }
                None => {
                    tracing::warn!(backend = %name, "Backend does not exist to remove");
                }
            }
        }
    }

    /// Returns the backend's current health flag; `false` for unknown
    /// names.
    pub async fn is_healthy(&self, name: &str) -> bool {
        self.inner
            .backends
            .read()
            .await
            .get(name)
            .map(Backend::is_healthy)
            .unwrap_or(false)
    }

    /// Returns the number of registered backends.
    pub async fn size(&self) -> usize {
        self.inner.backends.read().await.len()
    }

    /// Returns when the last probe round started, or `None` before the
    /// first round.
    pub fn last_checked_at(&self) -> Option<SystemTime> {
        *self
            .inner
            .last_checked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns when the next probe round is due, or `None` before the
    /// first round.
    pub fn next_check_at(&self) -> Option<SystemTime> {
        self.last_checked_at()
            .map(|checked| checked + self.inner.cfg.interval)
    }

    /// Returns the receiver for newly-healthy notifications.
    ///
    /// Fails with [`MonitorError::ChannelNotEnabled`] unless
    /// `send_new_healthy` was set, or [`MonitorError::ChannelTaken`] on
    /// a second call.
    pub fn healthy_receiver(&self) -> Result<mpsc::Receiver<HealthNotification>, MonitorError> {
        self.inner.channels.healthy_receiver()
    }

    /// Returns the receiver for newly-unhealthy notifications.
    ///
    /// Fails with [`MonitorError::ChannelNotEnabled`] unless
    /// `send_new_unhealthy` was set, or [`MonitorError::ChannelTaken`]
    /// on a second call.
    pub fn unhealthy_receiver(&self) -> Result<mpsc::Receiver<HealthNotification>, MonitorError> {
        self.inner.channels.unhealthy_receiver()
    }
}

impl Inner {
    /// One probe round: snapshot the membership, probe every backend
    /// concurrently, join all probes, then apply results and publish
    /// transitions in detection order.
    ///
    /// The membership lock is held for the whole round, so `add` and
    /// `remove` serialize against it and per-backend results are
    /// processed in wall-clock order.
    async fn tick(&self) {
        *self
            .last_checked
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(SystemTime::now());

        let mut backends = self.backends.write().await;

        let mut probes = Vec::with_capacity(backends.len());
        for backend in backends.values() {
            probes.push((
                backend.name.clone(),
                tokio::spawn(probe::run(backend.probe_target())),
            ));
        }

        for (name, probe) in probes {
            let outcome = match probe.await {
                Ok(outcome) => outcome,
                // A panicked probe is a failed probe, nothing more.
                Err(err) => {
                    tracing::error!(backend = %name, error = %err, "Panic during health check");
                    Err(anyhow::anyhow!("health check panicked"))
                }
            };

            let Some(backend) = backends.get_mut(&name) else {
                continue;
            };

            let (healthy, newly) = match outcome {
                Ok(()) => {
                    let result = backend.success();
                    tracing::debug!(
                        backend = %name,
                        streak = backend.status_streak(),
                        "Health check succeeded"
                    );
                    result
                }
                Err(err) => {
                    let result = backend.fail();
                    tracing::debug!(
                        backend = %name,
                        error = %err,
                        streak = backend.status_streak(),
                        "Health check failed"
                    );
                    result
                }
            };

            if !newly {
                continue;
            }
            if healthy {
                tracing::info!(backend = %name, "Backend entered healthy state");
                self.channels.send_healthy(backend.notification()).await;
            } else {
                tracing::warn!(backend = %name, "Backend entered unhealthy state");
                self.channels.send_unhealthy(backend.notification()).await;
            }
        }
    }
}
