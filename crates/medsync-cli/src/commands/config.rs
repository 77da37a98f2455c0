//! Config command handlers

use anyhow::{bail, Context, Result};

use medsync_core::Config;

use crate::output::{Output, OutputFormat};

const KEYS: &str = "data_dir, api_base_url, api_token, request_timeout_secs, \
                    counter_poll_secs, autosave_quiet_ms, probe_interval_secs, log_file";

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let token = config.api_token.as_ref().map(|_| "********");

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "api_base_url": config.api_base_url,
                    "api_token": token,
                    "request_timeout_secs": config.request_timeout_secs,
                    "counter_poll_secs": config.counter_poll_secs,
                    "autosave_quiet_ms": config.autosave_quiet_ms,
                    "probe_interval_secs": config.probe_interval_secs,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:             {}", config.data_dir.display());
            println!(
                "  api_base_url:         {}",
                config.api_base_url.as_deref().unwrap_or("(not set)")
            );
            println!("  api_token:            {}", token.unwrap_or("(not set)"));
            println!(
                "  request_timeout_secs: {}",
                config
                    .request_timeout_secs
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "(default)".to_string())
            );
            println!("  counter_poll_secs:    {}", config.counter_poll_secs);
            println!("  autosave_quiet_ms:    {}", config.autosave_quiet_ms);
            println!("  probe_interval_secs:  {}", config.probe_interval_secs);
            println!(
                "  log_file:             {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;
    config.save().context("Failed to save configuration")?;

    let shown = if key == "api_token" { "********" } else { value.as_str() };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let unset = value.is_empty() || value == "none";

    match key {
        "data_dir" => config.data_dir = value.into(),
        "api_base_url" => config.api_base_url = (!unset).then(|| value.to_string()),
        "api_token" => config.api_token = (!unset).then(|| value.to_string()),
        "request_timeout_secs" => {
            config.request_timeout_secs = if unset {
                None
            } else {
                Some(value.parse().context("request_timeout_secs must be a number")?)
            };
        }
        "counter_poll_secs" => {
            config.counter_poll_secs = value
                .parse()
                .context("counter_poll_secs must be a number (0 disables polling)")?;
        }
        "autosave_quiet_ms" => {
            config.autosave_quiet_ms = value.parse().context("autosave_quiet_ms must be a number")?;
        }
        "probe_interval_secs" => {
            config.probe_interval_secs =
                value.parse().context("probe_interval_secs must be a number")?;
        }
        "log_file" => config.log_file = (!unset).then(|| value.into()),
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                KEYS
            );
        }
    }

    Ok(())
}
