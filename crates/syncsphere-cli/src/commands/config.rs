//! Config command handlers

use anyhow::{Context, Result};

use syncsphere_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        OutputFormat::Quiet => {
            println!("{}", config.server_url);
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  server_url:             {}", config.server_url);
            println!(
                "  sync_root:              {}",
                display_opt(config.sync_root.as_ref().map(|p| p.display().to_string()))
            );
            println!("  device_name:            {}", config.device_name);
            println!("  reconnect_delay_ms:     {}", config.reconnect_delay_ms);
            println!(
                "  max_reconnect_attempts: {}",
                config
                    .max_reconnect_attempts
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "(unlimited)".to_string())
            );
            println!("  rescan_interval_secs:   {}", config.rescan_interval_secs);
            println!("  chunk_size:             {}", config.chunk_size);
            println!(
                "  log_file:               {}",
                display_opt(config.log_file.as_ref().map(|p| p.display().to_string()))
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

    // "none" clears optional values, like an empty string
    let value = if value == "none" { String::new() } else { value };
    config.set_value(&key, &value)?;
    config.save().context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn display_opt(value: Option<String>) -> String {
    value.unwrap_or_else(|| "(not set)".to_string())
}
