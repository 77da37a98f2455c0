//! Logging setup
//!
//! Logging is off unless `MEDSYNC_LOG` is set (e.g. `MEDSYNC_LOG=debug`).
//! Output goes to `log_file` when configured, stderr otherwise, so JSON
//! output on stdout stays clean.

use std::fs::OpenOptions;

use medsync_core::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "MEDSYNC_LOG";

pub fn init(config: &Config) {
    let Ok(log_level) = std::env::var(LOG_ENV) else {
        return;
    };

    let env_filter = EnvFilter::new(format!(
        "medsync_core={},medsync_cli={}",
        log_level, log_level
    ));

    let Some(log_path) = config.log_file.as_ref() else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    };

    let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            return;
        }
    };

    // Ignore the error if a subscriber is already installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .try_init();

    info!("logging to {:?}", log_path);
}
