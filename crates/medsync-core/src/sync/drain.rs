//! Outbox drain
//!
//! One pass over the queue, oldest row first, one request at a time. Each
//! row ends the pass in exactly one state:
//!
//! - delivered: removed and counted as processed
//! - permanently rejected (4xx except 429): moved to dead letters
//! - transiently failed (5xx, 429, no response, no sender): kept with
//!   `retries + 1` and `last_error` set
//! - already gone (another pass got to it first): skipped
//!
//! Passes may overlap. Removing a row twice is harmless and every row is
//! re-read right before dispatch, so a row already removed by one pass is
//! skipped by the other. A failure reported for a row that a concurrent pass
//! removed mid-flight is also counted as skipped, never dead-lettered.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use super::sender::{FailureClass, SendError, SenderRegistry};
use crate::models::QueuedMutation;
use crate::outbox::OutboxQueue;
use crate::storage::StorageResult;

/// Outcome of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Rows delivered and removed
    pub processed_count: usize,
    /// Delivered rows per collection
    pub per_collection_success: BTreeMap<String, usize>,
    /// Rows moved to dead letters
    pub dropped: usize,
    /// Rows kept for a later pass
    pub retained: usize,
    /// Rows a concurrent pass removed before this one could settle them
    pub skipped: usize,
}

impl DrainReport {
    /// Rows this pass looked at
    pub fn seen(&self) -> usize {
        self.processed_count + self.dropped + self.retained + self.skipped
    }
}

/// Run one drain pass
///
/// Only storage failures abort the pass; send failures are recorded on the
/// row and the pass moves on.
pub async fn drain(queue: &OutboxQueue, registry: &SenderRegistry) -> StorageResult<DrainReport> {
    let rows = queue.list()?;

    if rows.is_empty() {
        debug!("outbox empty, nothing to drain");
        return Ok(DrainReport::default());
    }

    let span = info_span!("drain", pending = rows.len());
    run_pass(queue, registry, rows).instrument(span).await
}

async fn run_pass(
    queue: &OutboxQueue,
    registry: &SenderRegistry,
    rows: Vec<QueuedMutation>,
) -> StorageResult<DrainReport> {
    let mut report = DrainReport::default();

    for snapshot in rows {
        let Some(row) = queue.get(&snapshot.id)? else {
            debug!(id = %snapshot.id, "row already removed, skipping");
            report.skipped += 1;
            continue;
        };

        match dispatch(registry, &row).await {
            Ok(()) => {
                queue.remove(&row.id)?;
                report.processed_count += 1;
                *report
                    .per_collection_success
                    .entry(row.collection.clone())
                    .or_insert(0) += 1;
                debug!(id = %row.id, collection = %row.collection, "mutation delivered");
            }
            Err(e) => match e.class() {
                FailureClass::Permanent => {
                    if queue.dead_letter(&row, e.status(), &e.to_string())? {
                        warn!(id = %row.id, collection = %row.collection, error = %e, "mutation rejected, dropping");
                        report.dropped += 1;
                    } else {
                        debug!(id = %row.id, error = %e, "rejected row already removed, skipping");
                        report.skipped += 1;
                    }
                }
                FailureClass::Transient => {
                    warn!(
                        id = %row.id,
                        collection = %row.collection,
                        retries = row.retries + 1,
                        error = %e,
                        "mutation failed, keeping for retry"
                    );
                    if queue.record_failure(&row.id, &e.to_string())?.is_some() {
                        report.retained += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
            },
        }
    }

    info!(
        processed = report.processed_count,
        dropped = report.dropped,
        retained = report.retained,
        skipped = report.skipped,
        "drain finished"
    );
    Ok(report)
}

async fn dispatch(registry: &SenderRegistry, row: &QueuedMutation) -> Result<(), SendError> {
    let (key, sender) = registry
        .resolve(row)
        .ok_or_else(|| SendError::NoSender(row.collection.clone()))?;
    debug!(id = %row.id, sender = key, "dispatching");
    sender.dispatch(row).await
}

/// Queue plus registry, cheap to clone into tasks
#[derive(Clone)]
pub struct DrainEngine {
    queue: OutboxQueue,
    registry: Arc<SenderRegistry>,
}

impl DrainEngine {
    pub fn new(queue: OutboxQueue, registry: SenderRegistry) -> Self {
        Self {
            queue,
            registry: Arc::new(registry),
        }
    }

    pub async fn drain(&self) -> StorageResult<DrainReport> {
        drain(&self.queue, &self.registry).await
    }

    pub fn queue(&self) -> &OutboxQueue {
        &self.queue
    }

    pub fn registry(&self) -> &SenderRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMutation;
    use crate::storage::LocalStore;
    use crate::sync::sender::{sender_fn, Sender, AUTO_SENDER, JSON_SENDER};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn queue() -> OutboxQueue {
        OutboxQueue::new(Arc::new(LocalStore::open_in_memory().unwrap()))
    }

    fn mutation(id: &str, collection: &str) -> NewMutation {
        NewMutation::with_id(id, collection, "/x", "POST", json!({"id": id}))
    }

    /// Answers with a scripted status per row id (200 when unscripted)
    /// and records the order of calls
    #[derive(Default)]
    struct Scripted {
        statuses: Mutex<HashMap<String, Vec<Option<u16>>>>,
        calls: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl Scripted {
        fn script(self, id: &str, statuses: &[Option<u16>]) -> Self {
            self.statuses
                .lock()
                .unwrap()
                .insert(id.to_string(), statuses.to_vec());
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sender for Scripted {
        async fn dispatch(&self, row: &QueuedMutation) -> Result<(), SendError> {
            self.calls.lock().unwrap().push(row.id.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = {
                let mut statuses = self.statuses.lock().unwrap();
                match statuses.get_mut(&row.id) {
                    Some(list) if !list.is_empty() => list.remove(0),
                    _ => Some(200),
                }
            };
            match next {
                Some(200) => Ok(()),
                Some(status) => Err(SendError::with_status(status, format!("HTTP {}", status))),
                None => Err(SendError::other("network unreachable")),
            }
        }
    }

    fn registry(sender: Arc<Scripted>) -> SenderRegistry {
        let mut registry = SenderRegistry::new();
        registry.register_shared(AUTO_SENDER, sender);
        registry
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let q = queue();
        let report = drain(&q, &SenderRegistry::new()).await.unwrap();
        assert_eq!(report, DrainReport::default());
    }

    #[tokio::test]
    async fn test_replays_in_fifo_order() {
        let q = queue();
        for id in ["1", "2", "3"] {
            q.enqueue(mutation(id, "beds")).unwrap();
        }
        let sender = Arc::new(Scripted::default());

        let report = drain(&q, &registry(sender.clone())).await.unwrap();

        assert_eq!(sender.calls(), vec!["1", "2", "3"]);
        assert_eq!(report.processed_count, 3);
        assert_eq!(report.per_collection_success.get("beds"), Some(&3));
        assert!(q.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_client_error_drops_row() {
        let q = queue();
        q.enqueue(mutation("bad", "beds")).unwrap();
        q.enqueue(mutation("good", "beds")).unwrap();
        let sender = Arc::new(Scripted::default().script("bad", &[Some(422)]));

        let report = drain(&q, &registry(sender.clone())).await.unwrap();

        assert_eq!(report.dropped, 1);
        assert_eq!(report.processed_count, 1);
        assert!(q.is_empty().unwrap());

        let letters = q.dead_letters().unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].id, "bad");
        assert_eq!(letters[0].status, Some(422));
    }

    #[tokio::test]
    async fn test_server_error_retains_then_succeeds() {
        let q = queue();
        q.enqueue(mutation("1", "beds")).unwrap();
        let sender = Arc::new(Scripted::default().script("1", &[Some(503)]));
        let registry = registry(sender.clone());

        let first = drain(&q, &registry).await.unwrap();
        assert_eq!(first.retained, 1);
        assert_eq!(first.processed_count, 0);

        let row = q.get("1").unwrap().unwrap();
        assert_eq!(row.retries, 1);
        assert!(row.last_error.unwrap().contains("503"));

        let second = drain(&q, &registry).await.unwrap();
        assert_eq!(second.processed_count, 1);
        assert!(q.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_rate_limit_and_network_errors_are_transient() {
        let q = queue();
        q.enqueue(mutation("limited", "beds")).unwrap();
        q.enqueue(mutation("offline", "beds")).unwrap();
        let sender = Arc::new(
            Scripted::default()
                .script("limited", &[Some(429)])
                .script("offline", &[None]),
        );

        let report = drain(&q, &registry(sender)).await.unwrap();

        assert_eq!(report.retained, 2);
        assert_eq!(q.len().unwrap(), 2);
        assert!(q.dead_letters().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_do_not_block_later_rows() {
        let q = queue();
        q.enqueue(mutation("1", "beds")).unwrap();
        q.enqueue(mutation("2", "beds")).unwrap();
        q.enqueue(mutation("3", "beds")).unwrap();
        let sender = Arc::new(Scripted::default().script("1", &[Some(500)]));

        let report = drain(&q, &registry(sender.clone())).await.unwrap();

        assert_eq!(sender.calls(), vec!["1", "2", "3"]);
        assert_eq!(report.processed_count, 2);
        assert_eq!(report.retained, 1);
        let ids: Vec<String> = q.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["1"]);
    }

    #[tokio::test]
    async fn test_missing_sender_is_transient() {
        let q = queue();
        q.enqueue(mutation("1", "beds")).unwrap();

        let report = drain(&q, &SenderRegistry::new()).await.unwrap();

        assert_eq!(report.retained, 1);
        let row = q.get("1").unwrap().unwrap();
        assert_eq!(row.retries, 1);
        assert!(row.last_error.unwrap().contains("No sender"));
    }

    #[tokio::test]
    async fn test_meta_sender_takes_precedence() {
        let q = queue();
        q.enqueue(mutation("1", "Y").sender("X")).unwrap();

        let x = Arc::new(Scripted::default());
        let y = Arc::new(Scripted::default());
        let mut registry = SenderRegistry::new();
        registry
            .register_shared("X", x.clone())
            .register_shared("Y", y.clone());

        drain(&q, &registry).await.unwrap();

        assert_eq!(x.calls(), vec!["1"]);
        assert!(y.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bed_assignment_via_pinned_sender() {
        let q = queue();
        q.enqueue(
            NewMutation::with_id(
                "1",
                "bedAssign",
                "/assign",
                "POST",
                json!({"patientId": "p1"}),
            )
            .sender("genericJSON"),
        )
        .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut registry = SenderRegistry::new();
        registry
            .register(
                "genericJSON",
                sender_fn(move |row: QueuedMutation| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().unwrap().push(row.payload.clone());
                        Ok(())
                    }
                }),
            )
            .register(
                JSON_SENDER,
                sender_fn(|_row: QueuedMutation| async {
                    Err::<(), _>(SendError::other("wrong sender"))
                }),
            );

        let report = drain(&q, &registry).await.unwrap();

        assert_eq!(report.processed_count, 1);
        assert_eq!(
            report.per_collection_success,
            BTreeMap::from([("bedAssign".to_string(), 1)])
        );
        assert_eq!(*seen.lock().unwrap(), vec![json!({"patientId": "p1"})]);
        assert!(q.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_overlapping_drains_empty_queue() {
        let q = queue();
        for id in ["1", "2", "3", "4"] {
            q.enqueue(mutation(id, "beds")).unwrap();
        }
        let sender = Arc::new(Scripted {
            delay: Some(Duration::from_millis(10)),
            ..Scripted::default()
        });
        let engine = DrainEngine::new(q.clone(), registry(sender.clone()));

        let (a, b) = tokio::join!(engine.drain(), engine.drain());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(q.is_empty().unwrap());
        assert!(a.processed_count + b.processed_count >= 4);
        assert_eq!(a.seen(), 4);
        assert_eq!(b.seen(), 4);
    }

    /// First call succeeds, every later call is rejected as a duplicate
    struct AcceptOnce {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Sender for AcceptOnce {
        async fn dispatch(&self, _row: &QueuedMutation) -> Result<(), SendError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            } else {
                tokio::time::sleep(Duration::from_millis(40)).await;
                Err(SendError::with_status(409, "duplicate idempotency key"))
            }
        }
    }

    #[tokio::test]
    async fn test_overlapping_rejection_after_delivery_is_not_dead_lettered() {
        let q = queue();
        q.enqueue(mutation("1", "bedAssign")).unwrap();
        let sender = Arc::new(AcceptOnce {
            calls: AtomicUsize::new(0),
        });
        let mut registry = SenderRegistry::new();
        registry.register_shared(AUTO_SENDER, sender.clone());
        let engine = DrainEngine::new(q.clone(), registry);

        let (a, b) = tokio::join!(engine.drain(), engine.drain());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(sender.calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.processed_count + b.processed_count, 1);
        assert_eq!(a.dropped + b.dropped, 0);
        assert_eq!(a.skipped + b.skipped, 1);
        assert!(q.is_empty().unwrap());
        assert!(q.dead_letters().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drain_engine_is_shareable() {
        let q = queue();
        q.enqueue(mutation("1", "patients")).unwrap();
        let engine = DrainEngine::new(q, registry(Arc::new(Scripted::default())));

        let handle = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.drain().await })
        };
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.per_collection_success.get("patients"), Some(&1));
        assert!(engine.queue().is_empty().unwrap());
    }
}
