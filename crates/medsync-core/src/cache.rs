//! Whole-collection read cache
//!
//! Screens read through a live fetch first and fall back to the last
//! snapshot saved here. Each successful online read replaces the snapshot
//! wholesale; there is no merging.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::models::CachedCollection;
use crate::storage::{LocalStore, StorageResult};

/// What `load_cache` hands back to a screen
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheSnapshot {
    pub items: Vec<Value>,
    /// `None` when nothing was ever cached for the key
    pub updated_at: Option<DateTime<Utc>>,
}

impl CacheSnapshot {
    /// Milliseconds since the epoch, `0` when absent
    pub fn updated_at_millis(&self) -> i64 {
        self.updated_at.map(|t| t.timestamp_millis()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.updated_at.is_none()
    }
}

/// Read/write API over the `cache` table
#[derive(Clone)]
pub struct CacheManager {
    store: Arc<LocalStore>,
}

impl CacheManager {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    /// Replace the snapshot for `key`, stamping it with the current time
    ///
    /// Returns the stored timestamp.
    pub fn save_cache(&self, key: &str, items: Vec<Value>) -> StorageResult<DateTime<Utc>> {
        self.store.put_cache(&CachedCollection {
            collection_key: key.to_string(),
            items,
            updated_at: Utc::now(),
        })
    }

    /// Load the snapshot for `key`
    ///
    /// Never fails: a missing row or a storage error both yield an empty
    /// snapshot so offline screens can still render.
    pub fn load_cache(&self, key: &str) -> CacheSnapshot {
        match self.store.get_cache(key) {
            Ok(Some(row)) => CacheSnapshot {
                items: row.items,
                updated_at: Some(row.updated_at),
            },
            Ok(None) => CacheSnapshot::default(),
            Err(e) => {
                warn!(collection = key, error = %e, "cache read failed, serving empty snapshot");
                CacheSnapshot::default()
            }
        }
    }
}
