//! Outbox queue
//!
//! Durable FIFO of mutations waiting to reach the server. Rows are written
//! when a live write fails or the app is offline, and removed by the drain
//! engine once they are delivered or classified as permanently failed.
//!
//! Every change is announced on a broadcast channel so badge counters can
//! refresh without polling the table.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{DeadLetter, NewMutation, QueuedMutation};
use crate::storage::{LocalStore, StorageResult};

/// Capacity of the change feed. Slow subscribers see `Lagged` and recompute.
const EVENT_CAPACITY: usize = 256;

/// Change notifications for outbox rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxEvent {
    /// A mutation was queued
    Created(String),
    /// A transient failure was recorded on a row
    Updated(String),
    /// A row left the queue (delivered or dropped)
    Deleted(String),
}

/// Pending-row statistics for UI badges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    pub total: usize,
    pub per_collection: BTreeMap<String, usize>,
}

/// Enqueue/list API over the `outbox` table
#[derive(Clone)]
pub struct OutboxQueue {
    store: Arc<LocalStore>,
    events: broadcast::Sender<OutboxEvent>,
}

impl OutboxQueue {
    pub fn new(store: Arc<LocalStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { store, events }
    }

    /// Queue a mutation with `retries = 0` and `created_at = now`
    ///
    /// Storage failures (including a reused id) are returned, never swallowed.
    pub fn enqueue(&self, mutation: NewMutation) -> StorageResult<QueuedMutation> {
        let row = QueuedMutation::from_new(mutation, Utc::now());
        self.store.insert_mutation(&row)?;
        debug!(id = %row.id, collection = %row.collection, "mutation queued");
        self.emit(OutboxEvent::Created(row.id.clone()));
        Ok(row)
    }

    /// All pending rows, oldest first
    pub fn list(&self) -> StorageResult<Vec<QueuedMutation>> {
        self.store.mutations_by_created()
    }

    /// Pending rows for one collection, oldest first
    pub fn list_collection(&self, collection: &str) -> StorageResult<Vec<QueuedMutation>> {
        self.store.mutations_in_collection(collection)
    }

    pub fn get(&self, id: &str) -> StorageResult<Option<QueuedMutation>> {
        self.store.get_mutation(id)
    }

    pub fn len(&self) -> StorageResult<usize> {
        self.store.mutation_count()
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove a row. Removing a row that is already gone is a no-op.
    pub fn remove(&self, id: &str) -> StorageResult<bool> {
        let removed = self.store.delete_mutation(id)?;
        if removed {
            self.emit(OutboxEvent::Deleted(id.to_string()));
        }
        Ok(removed)
    }

    /// Record a transient failure: `retries += 1`, `last_error = error`
    ///
    /// Returns the updated row, or `None` if it was removed meanwhile.
    pub fn record_failure(&self, id: &str, error: &str) -> StorageResult<Option<QueuedMutation>> {
        if !self.store.record_mutation_failure(id, error)? {
            return Ok(None);
        }
        self.emit(OutboxEvent::Updated(id.to_string()));
        self.store.get_mutation(id)
    }

    /// Move a permanently failed row to the dead-letter table
    ///
    /// Returns false, and records nothing, if the row was already removed
    /// (for instance delivered by an overlapping pass).
    pub fn dead_letter(
        &self,
        row: &QueuedMutation,
        status: Option<u16>,
        error: &str,
    ) -> StorageResult<bool> {
        let removed = self
            .store
            .dead_letter_mutation(&DeadLetter::from_row(row, status, error))?;
        if removed {
            self.emit(OutboxEvent::Deleted(row.id.clone()));
        }
        Ok(removed)
    }

    /// Permanently failed rows, most recent first
    pub fn dead_letters(&self) -> StorageResult<Vec<DeadLetter>> {
        self.store.dead_letters()
    }

    pub fn purge_dead_letters(&self) -> StorageResult<usize> {
        self.store.clear_dead_letters()
    }

    /// Subscribe to row changes
    pub fn subscribe(&self) -> broadcast::Receiver<OutboxEvent> {
        self.events.subscribe()
    }

    /// Recompute pending counts
    ///
    /// With a whitelist, only those collections are reported (zero when
    /// empty); otherwise every collection with pending rows is discovered.
    /// `total` always covers the whole queue.
    pub fn counts(&self, whitelist: Option<&[String]>) -> StorageResult<PendingCounts> {
        let grouped = self.store.mutation_counts_by_collection()?;
        let total = grouped.iter().map(|(_, n)| n).sum();

        let per_collection = match whitelist {
            Some(keys) => {
                let found: BTreeMap<String, usize> = grouped.into_iter().collect();
                keys.iter()
                    .map(|k| (k.clone(), found.get(k).copied().unwrap_or(0)))
                    .collect()
            }
            None => grouped.into_iter().collect(),
        };

        Ok(PendingCounts {
            total,
            per_collection,
        })
    }

    fn emit(&self, event: OutboxEvent) {
        let _ = self.events.send(event);
    }
}
