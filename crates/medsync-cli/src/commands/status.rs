//! Status command handler

use anyhow::Result;

use medsync_core::Store;

use super::storage_error;
use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(store: &Store, output: &Output) -> Result<()> {
    let config = store.config();
    let counts = store.outbox().counts(None).map_err(storage_error)?;
    let dead = store.outbox().dead_letters().map_err(storage_error)?.len();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "database": config.database_path(),
                    "api_base_url": config.api_base_url,
                    "pending": counts,
                    "dead_letters": dead
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", counts.total);
        }
        OutputFormat::Human => {
            println!("medsync Status");
            println!("==============");
            println!();
            println!("API:");
            println!(
                "  Base URL: {}",
                config.api_base_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  Token:    {}",
                if config.api_token.is_some() {
                    "set"
                } else {
                    "not set"
                }
            );
            println!();
            println!("Storage:");
            println!("  Database: {}", config.database_path().display());
            println!();
            println!("Outbox:");
            println!("  Pending:      {}", counts.total);
            for (collection, count) in &counts.per_collection {
                println!("    {}: {}", collection, count);
            }
            println!("  Dead letters: {}", dead);
        }
    }

    Ok(())
}
