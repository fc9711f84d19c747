//! Connectivity tracking.
//!
//! The monitor starts from the platform's current state (never assumed
//! online) and only reacts to transitions. An offline→online transition
//! schedules one sync trigger after a short debounce so the link can settle;
//! going offline again before the debounce elapses cancels it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::HttpBackend;
use crate::sync::SyncTrigger;

/// Synchronous read of the platform's current connectivity.
pub trait ConnectivitySource: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Source with a fixed answer, for hosts that push every change themselves.
#[derive(Debug, Clone, Copy)]
pub struct FixedConnectivity(pub bool);

impl ConnectivitySource for FixedConnectivity {
    fn is_online(&self) -> bool {
        self.0
    }
}

/// Active reachability check, polled when no platform events exist.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

#[async_trait]
impl ConnectivityProbe for HttpBackend {
    async fn probe(&self) -> bool {
        self.check_health().await
    }
}

pub struct NetworkMonitor {
    online: watch::Sender<bool>,
    debounce: Duration,
    trigger_tx: Mutex<Option<mpsc::UnboundedSender<SyncTrigger>>>,
    pending_restore: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new(source: &dyn ConnectivitySource, debounce: Duration) -> Self {
        let initial = source.is_online();
        info!(online = initial, "network monitor initialized");
        let (online, _) = watch::channel(initial);
        Self {
            online,
            debounce,
            trigger_tx: Mutex::new(None),
            pending_restore: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Where debounced restore triggers are delivered.
    pub fn set_trigger_sender(&self, tx: mpsc::UnboundedSender<SyncTrigger>) {
        if let Ok(mut guard) = self.trigger_tx.lock() {
            *guard = Some(tx);
        }
    }

    /// Feed a connectivity event. Must be called inside a tokio runtime.
    pub fn handle_connectivity_change(&self, online: bool) {
        let was_online = self.online.send_replace(online);
        match (was_online, online) {
            (false, true) => {
                info!(
                    debounce_ms = self.debounce.as_millis() as u64,
                    "Network restored; scheduling queued sync"
                );
                self.schedule_restore();
            }
            (true, false) => {
                warn!("Network offline; queued orders stay pending");
                self.cancel_pending_restore();
            }
            _ => debug!(online, "connectivity event without transition"),
        }
    }

    fn schedule_restore(&self) {
        let tx = match self.trigger_tx.lock().ok().and_then(|g| g.clone()) {
            Some(tx) => tx,
            None => return,
        };
        let rx = self.online.subscribe();
        let debounce = self.debounce;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if *rx.borrow() {
                let _ = tx.send(SyncTrigger::NetworkRestored);
            }
        });

        if let Ok(mut pending) = self.pending_restore.lock() {
            if let Some(previous) = pending.replace(handle) {
                previous.abort();
            }
        }
    }

    fn cancel_pending_restore(&self) {
        if let Ok(mut pending) = self.pending_restore.lock() {
            if let Some(handle) = pending.take() {
                handle.abort();
            }
        }
    }

    /// Poll `probe` every `interval`, feeding results in as events.
    pub fn spawn_polling(
        self: Arc<Self>,
        probe: Arc<dyn ConnectivityProbe>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let online = probe.probe().await;
                self.handle_connectivity_change(online);
            }
        })
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.cancel_pending_restore();
    }
}
