//! Connectivity tracking
//!
//! Holds the current online flag and broadcasts edge events. `Restored` is
//! sent once per offline to online transition; repeated "online" reports
//! while already online are ignored. Listeners typically start a drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::drain::DrainEngine;
use super::http::HttpTransport;

const EVENT_CAPACITY: usize = 16;

/// Connectivity edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// Went from offline to online
    Restored,
    /// Went from online to offline
    Lost,
}

/// Shared online/offline state
#[derive(Clone)]
pub struct Connectivity {
    online: Arc<watch::Sender<bool>>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl Connectivity {
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            online: Arc::new(online),
            events,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Report the current reachability
    ///
    /// Returns the edge this report caused, if any.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEvent> {
        let was_online = self.online.send_replace(online);
        let event = match (was_online, online) {
            (false, true) => ConnectivityEvent::Restored,
            (true, false) => ConnectivityEvent::Lost,
            _ => return None,
        };

        match event {
            ConnectivityEvent::Restored => info!("connectivity restored"),
            ConnectivityEvent::Lost => info!("connectivity lost"),
        }
        let _ = self.events.send(event);
        Some(event)
    }

    /// Subscribe to edge events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Watch the online flag
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Drain the outbox every time connectivity is restored
///
/// The task ends when every [`Connectivity`] clone is dropped.
pub fn spawn_auto_drain(connectivity: &Connectivity, engine: DrainEngine) -> JoinHandle<()> {
    let mut events = connectivity.subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ConnectivityEvent::Restored) => {}
                Ok(ConnectivityEvent::Lost) => continue,
                // Missed edges may include a restore
                Err(RecvError::Lagged(n)) => debug!(missed = n, "connectivity events lagged"),
                Err(RecvError::Closed) => break,
            }

            match engine.drain().await {
                Ok(report) if report.seen() > 0 => info!(
                    processed = report.processed_count,
                    dropped = report.dropped,
                    retained = report.retained,
                    "outbox drained after reconnect"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "drain after reconnect failed"),
            }
        }
    })
}

/// Handle to a running connectivity probe
pub struct ProbeHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    /// Stop probing and wait for the task to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

/// Periodically probe the API and feed the result into `connectivity`
///
/// Any HTTP response counts as online; only a transport failure counts as
/// offline. Dropping the handle stops the probe.
pub fn spawn_probe(
    transport: Arc<HttpTransport>,
    connectivity: Connectivity,
    interval: Duration,
) -> ProbeHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    let online = transport.probe().await;
                    debug!(online, "connectivity probe");
                    connectivity.set_online(online);
                }
            }
        }
    });

    ProbeHandle {
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}
