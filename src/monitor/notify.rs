//! Health transition notifications and the opt-in output channels.

use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use tokio::sync::mpsc;
use url::Url;

use super::MonitorError;

/// A health state transition for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthNotification {
    pub name: String,
    pub url: Url,
    pub healthy: bool,
    /// When the probe behind this transition ran. `None` marks a
    /// terminal notification: the backend was removed and will never
    /// change state again.
    pub timestamp: Option<SystemTime>,
}

/// One enabled notification channel.
///
/// Capacity is 1: a slow subscriber backpressures the tick task rather
/// than dropping transitions. The receiver is handed out once; the
/// sender is dropped on shutdown, which closes the channel.
struct Channel {
    tx: Mutex<Option<mpsc::Sender<HealthNotification>>>,
    rx: Mutex<Option<mpsc::Receiver<HealthNotification>>>,
}

impl Channel {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    async fn send(&self, notification: HealthNotification) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(tx) = tx {
            // A dropped receiver is the subscriber's choice, not an error.
            let _ = tx.send(notification).await;
        }
    }

    fn take_receiver(&self) -> Result<mpsc::Receiver<HealthNotification>, MonitorError> {
        self.rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(MonitorError::ChannelTaken)
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// The monitor's notification outputs, each present only when enabled
/// at construction.
pub(crate) struct OutputChannels {
    healthy: Option<Channel>,
    unhealthy: Option<Channel>,
}

impl OutputChannels {
    pub(crate) fn new(enable_healthy: bool, enable_unhealthy: bool) -> Self {
        Self {
            healthy: enable_healthy.then(Channel::new),
            unhealthy: enable_unhealthy.then(Channel::new),
        }
    }

    /// Publishes a newly-healthy transition. No-op when the channel is
    /// disabled; blocks while the channel is full.
    pub(crate) async fn send_healthy(&self, notification: HealthNotification) {
        if let Some(channel) = &self.healthy {
            channel.send(notification).await;
        }
    }

    /// Publishes a newly-unhealthy transition. No-op when the channel is
    /// disabled; blocks while the channel is full.
    pub(crate) async fn send_unhealthy(&self, notification: HealthNotification) {
        if let Some(channel) = &self.unhealthy {
            channel.send(notification).await;
        }
    }

    pub(crate) fn healthy_receiver(
        &self,
    ) -> Result<mpsc::Receiver<HealthNotification>, MonitorError> {
        self.healthy
            .as_ref()
            .ok_or(MonitorError::ChannelNotEnabled)?
            .take_receiver()
    }

    pub(crate) fn unhealthy_receiver(
        &self,
    ) -> Result<mpsc::Receiver<HealthNotification>, MonitorError> {
        self.unhealthy
            .as_ref()
            .ok_or(MonitorError::ChannelNotEnabled)?
            .take_receiver()
    }

    /// Drops the senders, closing any enabled channels. Subscribers see
    /// the channel end after draining buffered notifications.
    pub(crate) fn close(&self) {
        if let Some(channel) = &self.healthy {
            channel.close();
        }
        if let Some(channel) = &self.unhealthy {
            channel.close();
        }
    }
}
