//! Data models for medsync
//!
//! Defines the rows kept in the local store: queued mutations, cached
//! collections, dead letters and form drafts. Payloads and cached items are
//! opaque JSON; this crate never interprets domain records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Routing hints attached to a queued mutation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MutationMeta {
    /// Registry key of the sender that must replay this row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Free-form hints for custom senders
    #[serde(flatten)]
    pub hints: Map<String, Value>,
}

/// A mutation about to be queued
///
/// The id is assigned here, once, and never reused.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMutation {
    pub id: String,
    pub collection: String,
    pub endpoint: String,
    pub method: String,
    pub payload: Value,
    pub meta: MutationMeta,
}

impl NewMutation {
    /// Create a mutation with a freshly generated id
    pub fn new(
        collection: impl Into<String>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::with_id(
            Uuid::new_v4().to_string(),
            collection,
            endpoint,
            method,
            payload,
        )
    }

    /// Create a mutation with a caller-supplied id
    pub fn with_id(
        id: impl Into<String>,
        collection: impl Into<String>,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            endpoint: endpoint.into(),
            method: method.into().to_ascii_uppercase(),
            payload,
            meta: MutationMeta::default(),
        }
    }

    /// Pin the sender used on replay
    pub fn sender(mut self, name: impl Into<String>) -> Self {
        self.meta.sender = Some(name.into());
        self
    }

    /// Attach a free-form hint
    pub fn hint(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.hints.insert(key.into(), value);
        self
    }
}

/// A pending row in the outbox
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedMutation {
    pub id: String,
    pub collection: String,
    pub endpoint: String,
    pub method: String,
    pub payload: Value,
    pub meta: MutationMeta,
    /// Number of transient replay failures so far
    pub retries: u32,
    /// Message of the most recent transient failure
    pub last_error: Option<String>,
    /// Defines replay order (oldest first)
    pub created_at: DateTime<Utc>,
}

impl QueuedMutation {
    /// Build the stored row for a new mutation
    pub fn from_new(new: NewMutation, created_at: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            collection: new.collection,
            endpoint: new.endpoint,
            method: new.method,
            payload: new.payload,
            meta: new.meta,
            retries: 0,
            last_error: None,
            created_at,
        }
    }
}

/// Last successful online read of a collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedCollection {
    pub collection_key: String,
    pub items: Vec<Value>,
    pub updated_at: DateTime<Utc>,
}

/// Audit record of a permanently failed mutation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetter {
    pub id: String,
    pub collection: String,
    pub endpoint: String,
    pub method: String,
    pub payload: Value,
    pub meta: MutationMeta,
    pub retries: u32,
    /// Transport status that classified the failure as permanent
    pub status: Option<u16>,
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_row(row: &QueuedMutation, status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            id: row.id.clone(),
            collection: row.collection.clone(),
            endpoint: row.endpoint.clone(),
            method: row.method.clone(),
            payload: row.payload.clone(),
            meta: row.meta.clone(),
            retries: row.retries,
            status,
            error: error.into(),
            created_at: row.created_at,
            failed_at: Utc::now(),
        }
    }
}

/// In-progress form state for one (collection, key) slot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Draft {
    pub id: String,
    pub collection: String,
    pub key: String,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

impl Draft {
    pub fn new(collection: impl Into<String>, key: impl Into<String>, data: Value) -> Self {
        let collection = collection.into();
        let key = key.into();
        Self {
            id: Self::id_for(&collection, &key),
            collection,
            key,
            data,
            updated_at: Utc::now(),
        }
    }

    /// Primary key of the draft slot
    pub fn id_for(collection: &str, key: &str) -> String {
        format!("{}:{}", collection, key)
    }
}
