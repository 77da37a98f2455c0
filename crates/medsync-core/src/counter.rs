//! Live pending counter
//!
//! Background task that keeps [`PendingCounts`] current for UI badges. It
//! recomputes on every outbox event and on a fixed poll, so a missed or
//! lagged event is corrected on the next tick.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::outbox::{OutboxEvent, OutboxQueue, PendingCounts};

/// Live counter settings
#[derive(Debug, Clone, Default)]
pub struct LiveCounterConfig {
    /// Collections to report; `None` discovers them from pending rows
    pub whitelist: Option<Vec<String>>,
    /// Safety-net recompute interval; `None` disables polling
    pub poll_interval: Option<Duration>,
}

impl LiveCounterConfig {
    pub fn with_whitelist<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist = Some(collections.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to a running live counter
///
/// Dropping the handle stops the task.
pub struct LiveCounterHandle {
    counts_rx: watch::Receiver<PendingCounts>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl LiveCounterHandle {
    /// Latest published counts
    pub fn counts(&self) -> PendingCounts {
        self.counts_rx.borrow().clone()
    }

    /// Receiver that wakes whenever the counts change
    pub fn subscribe(&self) -> watch::Receiver<PendingCounts> {
        self.counts_rx.clone()
    }

    /// Stop the task and wait for it to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

/// Start the live counter for `queue`
///
/// The initial counts are computed before this returns, so
/// [`LiveCounterHandle::counts`] is meaningful immediately.
pub fn spawn_live_counter(queue: OutboxQueue, config: LiveCounterConfig) -> LiveCounterHandle {
    // Subscribe before the first recompute so no event falls in between
    let events = queue.subscribe();
    let initial = recompute(&queue, config.whitelist.as_deref()).unwrap_or_else(|| {
        let mut empty = PendingCounts::default();
        if let Some(keys) = &config.whitelist {
            empty.per_collection = keys.iter().map(|k| (k.clone(), 0)).collect();
        }
        empty
    });

    let (counts_tx, counts_rx) = watch::channel(initial);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(counter_loop(queue, config, events, counts_tx, shutdown_rx));

    LiveCounterHandle {
        counts_rx,
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}

async fn counter_loop(
    queue: OutboxQueue,
    config: LiveCounterConfig,
    mut events: broadcast::Receiver<OutboxEvent>,
    counts_tx: watch::Sender<PendingCounts>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut poll = config.poll_interval.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            event = events.recv() => match event {
                Ok(event) => debug!(?event, "outbox changed"),
                Err(RecvError::Lagged(missed)) => debug!(missed, "outbox events lagged, recomputing"),
                Err(RecvError::Closed) => break,
            },
            _ = tick(&mut poll) => {}
        }

        if let Some(counts) = recompute(&queue, config.whitelist.as_deref()) {
            counts_tx.send_if_modified(|current| {
                if *current == counts {
                    return false;
                }
                *current = counts;
                true
            });
        }
    }

    debug!("live counter stopped");
}

async fn tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn recompute(queue: &OutboxQueue, whitelist: Option<&[String]>) -> Option<PendingCounts> {
    match queue.counts(whitelist) {
        Ok(counts) => Some(counts),
        Err(e) => {
            warn!(error = %e, "failed to recompute pending counts");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMutation;
    use crate::storage::LocalStore;
    use serde_json::json;
    use std::sync::Arc;

    fn queue() -> OutboxQueue {
        OutboxQueue::new(Arc::new(LocalStore::open_in_memory().unwrap()))
    }

    fn mutation(id: &str, collection: &str) -> NewMutation {
        NewMutation::with_id(id, collection, "/x", "POST", json!({}))
    }

    async fn wait_for(rx: &mut watch::Receiver<PendingCounts>, total: usize) -> PendingCounts {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if rx.borrow_and_update().total == total {
                    return rx.borrow().clone();
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_initial_counts() {
        let q = queue();
        q.enqueue(mutation("1", "beds")).unwrap();

        let handle = spawn_live_counter(q, LiveCounterConfig::default());
        assert_eq!(handle.counts().total, 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_tracks_enqueue_and_remove() {
        let q = queue();
        let handle = spawn_live_counter(q.clone(), LiveCounterConfig::default());
        let mut rx = handle.subscribe();

        q.enqueue(mutation("1", "beds")).unwrap();
        q.enqueue(mutation("2", "patients")).unwrap();
        let counts = wait_for(&mut rx, 2).await;
        assert_eq!(counts.per_collection.get("beds"), Some(&1));
        assert_eq!(counts.per_collection.get("patients"), Some(&1));

        q.remove("1").unwrap();
        let counts = wait_for(&mut rx, 1).await;
        assert!(!counts.per_collection.contains_key("beds"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_whitelist_reports_zero() {
        let q = queue();
        let config = LiveCounterConfig::default().with_whitelist(["beds", "ot"]);
        let handle = spawn_live_counter(q.clone(), config);

        let counts = handle.counts();
        assert_eq!(counts.per_collection.get("beds"), Some(&0));
        assert_eq!(counts.per_collection.get("ot"), Some(&0));

        let mut rx = handle.subscribe();
        q.enqueue(mutation("1", "patients")).unwrap();
        let counts = wait_for(&mut rx, 1).await;
        assert!(!counts.per_collection.contains_key("patients"));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_catches_unannounced_changes() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let watched = OutboxQueue::new(store.clone());
        // A second queue over the same store has its own event channel,
        // so its writes are only visible to the counter through polling
        let silent = OutboxQueue::new(store);

        let config = LiveCounterConfig::default().with_poll_interval(Some(Duration::from_secs(5)));
        let handle = spawn_live_counter(watched, config);
        let mut rx = handle.subscribe();

        silent.enqueue(mutation("1", "beds")).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let counts = wait_for(&mut rx, 1).await;
        assert_eq!(counts.total, 1);

        handle.shutdown().await;
    }
}
