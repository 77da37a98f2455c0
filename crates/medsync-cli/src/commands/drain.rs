//! Drain command handler

use anyhow::{Context, Result};

use medsync_core::Store;

use super::storage_error;
use crate::output::Output;

/// Run one drain pass with the built-in HTTP senders
pub async fn run(store: &Store, output: &Output) -> Result<()> {
    let engine = store
        .http_drain_engine()
        .context("Cannot drain without an API endpoint")?;

    let pending = store.outbox().len().map_err(storage_error)?;
    if pending > 0 {
        output.message(&format!("Sending {} pending mutation(s)...", pending));
    }

    let report = engine.drain().await.map_err(storage_error)?;
    output.print_report(&report);
    Ok(())
}
