//! medsync CLI
//!
//! Command-line interface for medsync - inspect and replay the offline
//! mutation outbox.

use anyhow::Result;
use clap::{Parser, Subcommand};

use medsync_core::{Config, Store};

mod commands;
mod logging;
mod output;

use commands::enqueue::EnqueueArgs;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "medsync")]
#[command(about = "medsync - Offline-first mutation outbox")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a mutation for later delivery
    #[command(alias = "add")]
    Enqueue {
        /// Logical collection (e.g. beds, patients)
        #[arg(short, long)]
        collection: String,
        /// Endpoint, relative to api_base_url
        #[arg(short, long)]
        endpoint: String,
        /// HTTP method
        #[arg(short, long, default_value = "POST")]
        method: String,
        /// JSON payload, or @path to read it from a file
        #[arg(short, long)]
        payload: Option<String>,
        /// Sender to use instead of the collection default
        #[arg(short, long)]
        sender: Option<String>,
        /// Explicit mutation id (defaults to a new UUID)
        #[arg(long)]
        id: Option<String>,
    },
    /// Inspect the outbox
    Outbox {
        #[command(subcommand)]
        command: Option<OutboxCommands>,
    },
    /// Replay pending mutations now
    #[command(alias = "sync")]
    Drain,
    /// Show pending counts
    Counts {
        /// Only count these collections
        #[arg(short, long)]
        collection: Vec<String>,
    },
    /// Inspect or seed the read cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Inspect form drafts
    Draft {
        #[command(subcommand)]
        command: DraftCommands,
    },
    /// Drain automatically whenever the API becomes reachable
    Watch {
        /// Only count these collections
        #[arg(short, long)]
        collection: Vec<String>,
    },
    /// Show status (API, database, pending counts)
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum OutboxCommands {
    /// List pending mutations, oldest first
    #[command(alias = "ls")]
    List {
        /// Filter by collection
        #[arg(short, long)]
        collection: Option<String>,
    },
    /// Show one pending mutation
    Show {
        /// Mutation ID
        id: String,
    },
    /// Remove a pending mutation without sending it
    #[command(alias = "rm")]
    Discard {
        /// Mutation ID
        id: String,
    },
    /// List mutations the server rejected
    Dead {
        /// Delete all dead letters
        #[arg(long)]
        purge: bool,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show a cached collection
    Show {
        /// Cache key
        key: String,
    },
    /// Replace a cached collection
    Save {
        /// Cache key
        key: String,
        /// JSON array, or @path to read it from a file
        #[arg(short, long)]
        items: String,
    },
}

#[derive(Subcommand)]
enum DraftCommands {
    /// Show a saved draft
    Show {
        /// Collection
        collection: String,
        /// Form key
        key: String,
    },
    /// List drafts of a collection
    #[command(alias = "ls")]
    List {
        /// Collection
        collection: String,
    },
    /// Delete a draft
    #[command(alias = "rm")]
    Clear {
        /// Collection
        collection: String,
        /// Form key
        key: String,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (api_base_url, api_token, counter_poll_secs, ...)
        key: String,
        /// Configuration value ("none" clears optional keys)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands work without opening the database
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), &output);
    }

    let config = Config::load()?;
    logging::init(&config);
    let store = Store::open_with_config(config)?;

    match cli.command {
        Commands::Enqueue {
            collection,
            endpoint,
            method,
            payload,
            sender,
            id,
        } => commands::enqueue::run(
            &store,
            EnqueueArgs {
                collection,
                endpoint,
                method,
                payload,
                sender,
                id,
            },
            &output,
        ),
        Commands::Outbox { command } => handle_outbox_command(command, &store, &output),
        Commands::Drain => commands::drain::run(&store, &output).await,
        Commands::Counts { collection } => commands::counts::run(&store, collection, &output),
        Commands::Cache { command } => handle_cache_command(command, &store, &output),
        Commands::Draft { command } => handle_draft_command(command, &store, &output),
        Commands::Watch { collection } => commands::watch::run(&store, collection, &output).await,
        Commands::Status => commands::status::show(&store, &output),
        Commands::Config { .. } => Ok(()),
    }
}

fn handle_outbox_command(
    command: Option<OutboxCommands>,
    store: &Store,
    output: &Output,
) -> Result<()> {
    match command {
        Some(OutboxCommands::List { collection }) => {
            commands::outbox::list(store, collection, output)
        }
        None => commands::outbox::list(store, None, output),
        Some(OutboxCommands::Show { id }) => commands::outbox::show(store, id, output),
        Some(OutboxCommands::Discard { id }) => commands::outbox::discard(store, id, output),
        Some(OutboxCommands::Dead { purge }) => commands::outbox::dead(store, purge, output),
    }
}

fn handle_cache_command(command: CacheCommands, store: &Store, output: &Output) -> Result<()> {
    match command {
        CacheCommands::Show { key } => commands::cache::show(store, key, output),
        CacheCommands::Save { key, items } => commands::cache::save(store, key, items, output),
    }
}

fn handle_draft_command(command: DraftCommands, store: &Store, output: &Output) -> Result<()> {
    match command {
        DraftCommands::Show { collection, key } => {
            commands::draft::show(store, collection, key, output)
        }
        DraftCommands::List { collection } => commands::draft::list(store, collection, output),
        DraftCommands::Clear { collection, key } => {
            commands::draft::clear(store, collection, key, output)
        }
    }
}

fn handle_config_command(command: Option<ConfigCommands>, output: &Output) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(output),
        Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
    }
}
