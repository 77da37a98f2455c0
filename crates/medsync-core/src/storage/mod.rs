//! Storage layer
//!
//! The single durable store behind every other component.
//!
//! ## Architecture
//!
//! - **SQLite**: one database file under the configured data directory
//! - **LocalStore**: the shared handle, constructed once and passed around
//!   as `Arc<LocalStore>`
//!
//! Higher layers (cache, outbox, drafts) each wrap exactly one table's API.

pub mod error;
pub mod local;
pub mod schema;

pub use error::{StorageError, StorageResult};
pub use local::LocalStore;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
