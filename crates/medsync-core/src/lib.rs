//! medsync core library
//!
//! Offline-first mutation synchronization: a durable outbox of pending
//! writes, a replay engine that transmits them once connectivity returns,
//! and a read cache so screens keep working offline.
//!
//! # Architecture
//!
//! - **SQLite**: one local database holds the cache, outbox, dead letters
//!   and drafts
//! - **Senders**: pluggable strategies that encode and transmit a row
//! - **Drain**: sequential FIFO replay with permanent/transient
//!   classification
//!
//! Delivery is at-least-once. Each replayed request carries the row id as
//! an `Idempotency-Key` so servers can deduplicate.
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open()?;
//!
//! // Queue a write that could not reach the server
//! store.outbox().enqueue(NewMutation::new("beds", "/beds/assign", "POST", payload))?;
//!
//! // Replay once back online
//! let report = store.http_drain_engine()?.drain().await?;
//! ```
//!
//! # Modules
//!
//! - `store`: Shared handles over one database (main entry point)
//! - `models`: Rows kept in the local store
//! - `storage`: SQLite tables and errors
//! - `cache`: Whole-collection read cache
//! - `outbox`: Pending mutation queue and change feed
//! - `sync`: Senders, drain engine and connectivity signal
//! - `counter`: Live pending counts
//! - `drafts`: Form draft autosave
//! - `config`: Application configuration

pub mod cache;
pub mod config;
pub mod counter;
pub mod drafts;
pub mod models;
pub mod outbox;
pub mod storage;
pub mod store;
pub mod sync;

pub use cache::{CacheManager, CacheSnapshot};
pub use config::Config;
pub use counter::{spawn_live_counter, LiveCounterConfig, LiveCounterHandle};
pub use drafts::{spawn_autosave, AutosaveHandle, DraftStore};
pub use models::{CachedCollection, DeadLetter, Draft, MutationMeta, NewMutation, QueuedMutation};
pub use outbox::{OutboxEvent, OutboxQueue, PendingCounts};
pub use storage::{LocalStore, StorageError, StorageResult};
pub use store::Store;
pub use sync::{
    drain, Connectivity, ConnectivityEvent, DrainEngine, DrainReport, HttpTransport, SendError,
    Sender, SenderRegistry,
};
