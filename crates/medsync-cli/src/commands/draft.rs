//! Draft command handlers

use anyhow::{bail, Result};

use medsync_core::Store;

use super::storage_error;
use crate::output::Output;

pub fn show(store: &Store, collection: String, key: String, output: &Output) -> Result<()> {
    let Some(draft) = store
        .drafts()
        .load(&collection, &key)
        .map_err(storage_error)?
    else {
        bail!("No draft for {}:{}", collection, key);
    };

    output.print_draft(&draft);
    Ok(())
}

pub fn list(store: &Store, collection: String, output: &Output) -> Result<()> {
    let drafts = store
        .drafts()
        .list_collection(&collection)
        .map_err(storage_error)?;
    output.print_drafts(&drafts);
    Ok(())
}

pub fn clear(store: &Store, collection: String, key: String, output: &Output) -> Result<()> {
    if store
        .drafts()
        .delete(&collection, &key)
        .map_err(storage_error)?
    {
        output.success(&format!("Cleared draft {}:{}", collection, key));
    } else {
        output.message(&format!("No draft for {}:{}", collection, key));
    }
    Ok(())
}
