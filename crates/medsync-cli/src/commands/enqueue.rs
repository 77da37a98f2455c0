//! Enqueue command handler

use anyhow::{Context, Result};
use serde_json::Value;

use medsync_core::{NewMutation, Store};

use super::{parse_json_arg, storage_error};
use crate::output::Output;

/// Arguments of `medsync enqueue`
pub struct EnqueueArgs {
    pub collection: String,
    pub endpoint: String,
    pub method: String,
    pub payload: Option<String>,
    pub sender: Option<String>,
    pub id: Option<String>,
}

/// Queue a mutation for the next drain
pub fn run(store: &Store, args: EnqueueArgs, output: &Output) -> Result<()> {
    let payload = match args.payload.as_deref() {
        Some(raw) => parse_json_arg(raw).context("Invalid --payload")?,
        None => Value::Null,
    };

    let mut mutation = match args.id {
        Some(id) => NewMutation::with_id(id, args.collection, args.endpoint, args.method, payload),
        None => NewMutation::new(args.collection, args.endpoint, args.method, payload),
    };
    if let Some(sender) = args.sender {
        mutation = mutation.sender(sender);
    }

    let row = store.outbox().enqueue(mutation).map_err(storage_error)?;

    if output.is_quiet() {
        println!("{}", row.id);
    } else {
        output.print_mutation(&row);
    }

    Ok(())
}
