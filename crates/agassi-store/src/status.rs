//! Store readiness monitoring.
//!
//! Polls the local store and turns readiness edges into signals:
//! the first time it becomes ready → `Ready`; losing it → `Disconnected`;
//! regaining it afterwards → `Reconnected`.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::rqlite::RqliteClient;

/// Readiness transition of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSignal {
    Ready,
    Disconnected,
    Reconnected,
}

/// Something that can report whether the store is ready to serve.
pub trait ReadinessProbe: Send + Sync {
    fn is_ready(&self) -> impl Future<Output = bool> + Send;
}

impl ReadinessProbe for RqliteClient {
    async fn is_ready(&self) -> bool {
        RqliteClient::is_ready(self).await
    }
}

/// Edge detector over successive readiness observations.
#[derive(Debug, Default)]
pub struct StatusTracker {
    ever_ready: bool,
    up: bool,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation and return the signal it produces, if any.
    pub fn observe(&mut self, ready: bool) -> Option<StoreSignal> {
        let signal = match (self.up, ready) {
            (false, true) if !self.ever_ready => Some(StoreSignal::Ready),
            (false, true) => Some(StoreSignal::Reconnected),
            (true, false) => Some(StoreSignal::Disconnected),
            _ => None,
        };
        self.up = ready;
        self.ever_ready |= ready;
        signal
    }

    pub fn is_up(&self) -> bool {
        self.up
    }
}

/// Background poller that publishes `StoreSignal`s.
pub struct StatusMonitor<P> {
    probe: P,
    interval: Duration,
}

impl<P: ReadinessProbe> StatusMonitor<P> {
    pub fn new(probe: P) -> Self {
        Self {
            probe,
            interval: Duration::from_secs(1),
        }
    }

    /// Set the polling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until shutdown, sending a signal on every readiness edge.
    pub async fn run(self, signals: mpsc::UnboundedSender<StoreSignal>, mut shutdown: watch::Receiver<bool>) {
        let mut tracker = StatusTracker::new();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "store status monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ready = self.probe.is_ready().await;
                    if let Some(signal) = tracker.observe(ready) {
                        match signal {
                            StoreSignal::Disconnected => warn!("store disconnected"),
                            other => info!(signal = ?other, "store status changed"),
                        }
                        if signals.send(signal).is_err() {
                            debug!("store signal receiver dropped");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("store status monitor shutting down");
                    break;
                }
            }
        }
    }
}
