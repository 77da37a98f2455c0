//! Outbox command handlers

use anyhow::{bail, Result};

use medsync_core::Store;

use super::storage_error;
use crate::output::Output;

/// List pending mutations, optionally for one collection
pub fn list(store: &Store, collection: Option<String>, output: &Output) -> Result<()> {
    let rows = match collection {
        Some(c) => store.outbox().list_collection(&c),
        None => store.outbox().list(),
    }
    .map_err(storage_error)?;

    output.print_mutations(&rows);
    Ok(())
}

/// Show one pending mutation
pub fn show(store: &Store, id: String, output: &Output) -> Result<()> {
    let Some(row) = store.outbox().get(&id).map_err(storage_error)? else {
        bail!("No pending mutation with id '{}'", id);
    };

    output.print_mutation(&row);
    Ok(())
}

/// Remove a pending mutation without sending it
pub fn discard(store: &Store, id: String, output: &Output) -> Result<()> {
    if !store.outbox().remove(&id).map_err(storage_error)? {
        bail!("No pending mutation with id '{}'", id);
    }

    output.success(&format!("Discarded {}", id));
    Ok(())
}

/// List (or purge) permanently failed mutations
pub fn dead(store: &Store, purge: bool, output: &Output) -> Result<()> {
    if purge {
        let removed = store.outbox().purge_dead_letters().map_err(storage_error)?;
        output.success(&format!("Purged {} dead letter(s)", removed));
        return Ok(());
    }

    let letters = store.outbox().dead_letters().map_err(storage_error)?;
    output.print_dead_letters(&letters);
    Ok(())
}
