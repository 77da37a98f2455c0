//! Form draft autosave
//!
//! Keeps in-progress form state across reloads. One slot per
//! (collection, key); each save overwrites the slot. Drafts are a
//! convenience and take no part in outbox replay.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::Draft;
use crate::storage::{LocalStore, StorageResult};

/// Read/write API over the `drafts` table
#[derive(Clone)]
pub struct DraftStore {
    store: Arc<LocalStore>,
}

impl DraftStore {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Overwrite the slot with `data`
    pub fn save(&self, collection: &str, key: &str, data: Value) -> StorageResult<Draft> {
        let draft = Draft::new(collection, key, data);
        self.store.put_draft(&draft)?;
        Ok(draft)
    }

    pub fn load(&self, collection: &str, key: &str) -> StorageResult<Option<Draft>> {
        self.store.get_draft(&Draft::id_for(collection, key))
    }

    /// Discard the slot, typically after the form was submitted
    pub fn delete(&self, collection: &str, key: &str) -> StorageResult<bool> {
        self.store.delete_draft(&Draft::id_for(collection, key))
    }

    pub fn list_collection(&self, collection: &str) -> StorageResult<Vec<Draft>> {
        self.store.drafts_in_collection(collection)
    }
}

enum AutosaveCommand {
    Update(Value),
    Flush(oneshot::Sender<()>),
}

/// Handle to a debounced autosave task
///
/// Dropping the handle writes any pending snapshot and stops the task.
pub struct AutosaveHandle {
    command_tx: mpsc::UnboundedSender<AutosaveCommand>,
    task: JoinHandle<()>,
}

impl AutosaveHandle {
    /// Record the latest form state; written once input goes quiet
    pub fn update(&self, data: Value) {
        let _ = self.command_tx.send(AutosaveCommand::Update(data));
    }

    /// Write any pending snapshot now
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.command_tx.send(AutosaveCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Flush and wait for the task to exit
    pub async fn close(self) {
        let AutosaveHandle { command_tx, task } = self;
        drop(command_tx);
        let _ = task.await;
    }
}

/// Start autosaving the (collection, key) slot
///
/// Each [`AutosaveHandle::update`] restarts the quiet period; the latest
/// snapshot is written when no update arrived for `quiet_period`.
pub fn spawn_autosave(
    drafts: DraftStore,
    collection: impl Into<String>,
    key: impl Into<String>,
    quiet_period: Duration,
) -> AutosaveHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(autosave_loop(
        drafts,
        collection.into(),
        key.into(),
        quiet_period,
        command_rx,
    ));

    AutosaveHandle { command_tx, task }
}

async fn autosave_loop(
    drafts: DraftStore,
    collection: String,
    key: String,
    quiet_period: Duration,
    mut command_rx: mpsc::UnboundedReceiver<AutosaveCommand>,
) {
    let mut pending: Option<Value> = None;

    loop {
        let command = if pending.is_some() {
            match tokio::time::timeout(quiet_period, command_rx.recv()).await {
                Ok(command) => command,
                Err(_) => {
                    write(&drafts, &collection, &key, pending.take());
                    continue;
                }
            }
        } else {
            command_rx.recv().await
        };

        match command {
            Some(AutosaveCommand::Update(data)) => pending = Some(data),
            Some(AutosaveCommand::Flush(ack)) => {
                write(&drafts, &collection, &key, pending.take());
                let _ = ack.send(());
            }
            None => {
                write(&drafts, &collection, &key, pending.take());
                break;
            }
        }
    }
}

fn write(drafts: &DraftStore, collection: &str, key: &str, data: Option<Value>) {
    let Some(data) = data else {
        return;
    };
    match drafts.save(collection, key, data) {
        Ok(_) => debug!(collection, key, "draft saved"),
        Err(e) => warn!(collection, key, error = %e, "draft autosave failed"),
    }
}
