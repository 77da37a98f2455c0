//! Watch command handler
//!
//! Probes the API, drains the outbox each time connectivity comes back and
//! prints pending counts as they change, until Ctrl-C.

use anyhow::{Context, Result};
use tracing::debug;

use medsync_core::sync::{spawn_auto_drain, spawn_probe, Connectivity, SenderRegistry};
use medsync_core::Store;

use crate::output::Output;

pub async fn run(store: &Store, collections: Vec<String>, output: &Output) -> Result<()> {
    let config = store.config();
    let transport = store
        .http_transport()
        .context("Cannot watch without an API endpoint")?;

    // Start offline so the first successful probe triggers a drain
    let connectivity = Connectivity::new(false);
    let engine = store.drain_engine(SenderRegistry::with_http_defaults(transport.clone()));
    let drain_task = spawn_auto_drain(&connectivity, engine);
    let probe = spawn_probe(transport, connectivity.clone(), config.probe_interval());

    let whitelist = (!collections.is_empty()).then_some(collections);
    let counter = store.live_counter(whitelist);
    let mut counts_rx = counter.subscribe();
    let mut online_rx = connectivity.watch();

    output.message(&format!(
        "Watching {} (Ctrl-C to stop)...",
        transport_label(store)
    ));
    output.print_counts(&counter.counts());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = counts_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let counts = counts_rx.borrow_and_update().clone();
                output.print_counts(&counts);
            }
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *online_rx.borrow_and_update();
                output.message(if online { "Online" } else { "Offline" });
            }
        }
    }

    debug!("stopping watch");
    probe.shutdown().await;
    counter.shutdown().await;
    drain_task.abort();

    output.success("Stopped watching");
    Ok(())
}

fn transport_label(store: &Store) -> String {
    store
        .config()
        .api_base_url
        .clone()
        .unwrap_or_else(|| "(no API URL)".to_string())
}
