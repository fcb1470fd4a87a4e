//! Glue between the health monitor and the consistent hash table.
//!
//! A [`Balancer`] subscribes to both monitor channels and steers table
//! membership from health transitions: newly healthy backends enter the
//! table, newly unhealthy or removed backends leave it. Packet lookups
//! then only ever resolve to currently-healthy backends.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::hash::{fingerprint, ConsistentHash};
use crate::monitor::{HealthMonitor, HealthNotification, MonitorError};

/// Routes packets to healthy backends by 5-tuple.
///
/// Construction claims both notification receivers from the monitor, so
/// the monitor must have been built with both channels enabled.
pub struct Balancer {
    table: Arc<ConsistentHash>,
    healthy_rx: Mutex<Option<mpsc::Receiver<HealthNotification>>>,
    unhealthy_rx: Mutex<Option<mpsc::Receiver<HealthNotification>>>,
    steering: Mutex<Option<JoinHandle<()>>>,
}

impl Balancer {
    /// Creates a balancer over the given table, subscribed to the
    /// monitor's health transitions.
    pub fn new(table: ConsistentHash, monitor: &HealthMonitor) -> Result<Self, MonitorError> {
        let healthy_rx = monitor.healthy_receiver()?;
        let unhealthy_rx = monitor.unhealthy_receiver()?;

        Ok(Self {
            table: Arc::new(table),
            healthy_rx: Mutex::new(Some(healthy_rx)),
            unhealthy_rx: Mutex::new(Some(unhealthy_rx)),
            steering: Mutex::new(None),
        })
    }

    /// Spawns the steering task. Non-blocking; the task runs until the
    /// monitor is stopped and both channels close.
    pub fn start(&self) -> Result<(), MonitorError> {
        let mut healthy_rx = self
            .healthy_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(MonitorError::ChannelTaken)?;
        let mut unhealthy_rx = self
            .unhealthy_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(MonitorError::ChannelTaken)?;

        let table = Arc::clone(&self.table);
        let handle = tokio::spawn(async move {
            let mut healthy_open = true;
            let mut unhealthy_open = true;
            while healthy_open || unhealthy_open {
                tokio::select! {
                    noti = healthy_rx.recv(), if healthy_open => match noti {
                        Some(noti) => {
                            tracing::debug!(backend = %noti.name, "Steering backend into the table");
                            table.add([noti.name.as_str()]);
                        }
                        None => healthy_open = false,
                    },
                    noti = unhealthy_rx.recv(), if unhealthy_open => match noti {
                        Some(noti) => {
                            tracing::debug!(backend = %noti.name, "Steering backend out of the table");
                            table.remove([noti.name.as_str()]);
                        }
                        None => unhealthy_open = false,
                    },
                }
            }
            tracing::info!("Steering task finished");
        });
        *self
            .steering
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(())
    }

    /// Waits for the steering task to finish. Only returns promptly
    /// after the monitor has been stopped.
    pub async fn stopped(&self) {
        let handle = self
            .steering
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Returns the backend for a packet identified by its 5-tuple, or
    /// `None` when no backend is healthy.
    pub fn backend_for(
        &self,
        src_ip: IpAddr,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
        proto: u8,
    ) -> Option<String> {
        let key = u64::from(fingerprint(src_ip, src_port, dst_ip, dst_port, proto));
        self.table.hash(key)
    }

    /// The underlying lookup table.
    pub fn table(&self) -> &Arc<ConsistentHash> {
        &self.table
    }
}
