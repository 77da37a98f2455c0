//! Cache command handlers

use anyhow::{bail, Result};
use serde_json::Value;

use medsync_core::Store;

use super::{parse_json_arg, storage_error};
use crate::output::Output;

pub fn show(store: &Store, key: String, output: &Output) -> Result<()> {
    let snapshot = store.cache().load_cache(&key);
    output.print_snapshot(&key, &snapshot);
    Ok(())
}

/// Replace the cached snapshot for `key` with a JSON array
pub fn save(store: &Store, key: String, items: String, output: &Output) -> Result<()> {
    let Value::Array(items) = parse_json_arg(&items)? else {
        bail!("--items must be a JSON array");
    };

    let count = items.len();
    store
        .cache()
        .save_cache(&key, items)
        .map_err(storage_error)?;

    output.success(&format!("Cached {} item(s) for '{}'", count, key));
    Ok(())
}
