//! Counts command handler

use anyhow::Result;

use medsync_core::Store;

use super::storage_error;
use crate::output::Output;

/// Print pending counts, restricted to `collections` when given
pub fn run(store: &Store, collections: Vec<String>, output: &Output) -> Result<()> {
    let whitelist = (!collections.is_empty()).then_some(collections);
    let counts = store
        .outbox()
        .counts(whitelist.as_deref())
        .map_err(storage_error)?;

    output.print_counts(&counts);
    Ok(())
}
