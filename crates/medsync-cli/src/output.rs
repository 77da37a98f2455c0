//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use medsync_core::{CacheSnapshot, DeadLetter, Draft, DrainReport, PendingCounts, QueuedMutation};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a single queued mutation
    pub fn print_mutation(&self, row: &QueuedMutation) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:         {}", row.id);
                println!("Collection: {}", row.collection);
                println!("Request:    {} {}", row.method, row.endpoint);
                if let Some(ref sender) = row.meta.sender {
                    println!("Sender:     {}", sender);
                }
                println!("Created:    {}", local_time(&row.created_at));
                println!("Retries:    {}", row.retries);
                if let Some(ref error) = row.last_error {
                    println!("Last error: {}", error);
                }
                println!();
                println!("{}", pretty(&row.payload));
            }
            OutputFormat::Json => print_json(row),
            OutputFormat::Quiet => println!("{}", row.id),
        }
    }

    /// Print the outbox, oldest first
    pub fn print_mutations(&self, rows: &[QueuedMutation]) {
        match self.format {
            OutputFormat::Human => {
                if rows.is_empty() {
                    println!("Outbox is empty.");
                    return;
                }
                for row in rows {
                    let retries = if row.retries == 0 {
                        String::new()
                    } else {
                        format!(" [retries: {}]", row.retries)
                    };
                    println!(
                        "{} | {} | {:<6} {}{}",
                        short_id(&row.id),
                        truncate(&row.collection, 16),
                        row.method,
                        truncate(&row.endpoint, 40),
                        retries
                    );
                }
                println!("\n{} pending mutation(s)", rows.len());
            }
            OutputFormat::Json => print_json(&rows),
            OutputFormat::Quiet => {
                for row in rows {
                    println!("{}", row.id);
                }
            }
        }
    }

    /// Print permanently failed mutations
    pub fn print_dead_letters(&self, letters: &[DeadLetter]) {
        match self.format {
            OutputFormat::Human => {
                if letters.is_empty() {
                    println!("No dead letters.");
                    return;
                }
                for letter in letters {
                    let status = letter
                        .status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{} | {} | {} {} | {} | {}",
                        short_id(&letter.id),
                        letter.collection,
                        letter.method,
                        letter.endpoint,
                        status,
                        truncate(&letter.error, 50)
                    );
                }
                println!("\n{} dead letter(s)", letters.len());
            }
            OutputFormat::Json => print_json(&letters),
            OutputFormat::Quiet => {
                for letter in letters {
                    println!("{}", letter.id);
                }
            }
        }
    }

    /// Print the result of a drain pass
    pub fn print_report(&self, report: &DrainReport) {
        match self.format {
            OutputFormat::Human => {
                if report.seen() == 0 {
                    println!("Nothing to sync.");
                    return;
                }
                println!("Synced:   {}", report.processed_count);
                for (collection, count) in &report.per_collection_success {
                    println!("  {}: {}", collection, count);
                }
                if report.dropped > 0 {
                    println!("Rejected: {} (see `medsync outbox dead`)", report.dropped);
                }
                if report.retained > 0 {
                    println!("Pending:  {} (will retry)", report.retained);
                }
            }
            OutputFormat::Json => print_json(report),
            OutputFormat::Quiet => println!("{}", report.processed_count),
        }
    }

    /// Print pending counts
    pub fn print_counts(&self, counts: &PendingCounts) {
        match self.format {
            OutputFormat::Human => {
                println!("Pending: {}", counts.total);
                for (collection, count) in &counts.per_collection {
                    println!("  {}: {}", collection, count);
                }
            }
            OutputFormat::Json => print_json(counts),
            OutputFormat::Quiet => println!("{}", counts.total),
        }
    }

    /// Print a cached collection
    pub fn print_snapshot(&self, key: &str, snapshot: &CacheSnapshot) {
        match self.format {
            OutputFormat::Human => {
                match snapshot.updated_at {
                    Some(ref at) => println!("{} (cached {})", key, local_time(at)),
                    None => {
                        println!("Nothing cached for '{}'.", key);
                        return;
                    }
                }
                for item in &snapshot.items {
                    println!("{}", item);
                }
                println!("\n{} item(s)", snapshot.items.len());
            }
            OutputFormat::Json => print_json(snapshot),
            OutputFormat::Quiet => println!("{}", snapshot.items.len()),
        }
    }

    /// Print a form draft
    pub fn print_draft(&self, draft: &Draft) {
        match self.format {
            OutputFormat::Human => {
                println!("Draft {} (saved {})", draft.id, local_time(&draft.updated_at));
                println!();
                println!("{}", pretty(&draft.data));
            }
            OutputFormat::Json => print_json(draft),
            OutputFormat::Quiet => println!("{}", draft.data),
        }
    }

    /// Print drafts of one collection
    pub fn print_drafts(&self, drafts: &[Draft]) {
        match self.format {
            OutputFormat::Human => {
                if drafts.is_empty() {
                    println!("No drafts found.");
                    return;
                }
                for draft in drafts {
                    println!("{} | {}", draft.key, local_time(&draft.updated_at));
                }
            }
            OutputFormat::Json => print_json(&drafts),
            OutputFormat::Quiet => {
                for draft in drafts {
                    println!("{}", draft.key);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to render JSON output: {}", e),
    }
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn local_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// First 8 characters of an id
fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
