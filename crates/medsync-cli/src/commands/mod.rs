//! Command handlers

pub mod cache;
pub mod config;
pub mod counts;
pub mod draft;
pub mod drain;
pub mod enqueue;
pub mod outbox;
pub mod status;
pub mod watch;

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use medsync_core::StorageError;
use serde_json::Value;

/// Attach the recovery hint to a storage error, if there is one
pub fn storage_error(error: StorageError) -> anyhow::Error {
    match error.recovery_suggestion() {
        Some(hint) => anyhow!("{}\nHint: {}", error, hint),
        None => error.into(),
    }
}

/// Parse a JSON argument; `@path` reads the JSON from a file
pub fn parse_json_arg(raw: &str) -> Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("Failed to read {}", path))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("Invalid JSON")
}
