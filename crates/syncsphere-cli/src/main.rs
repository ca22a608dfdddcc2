//! SyncSphere CLI
//!
//! Command-line interface for SyncSphere - folder sync with a paired device.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use syncsphere_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "syncsphere")]
#[command(about = "SyncSphere - keep a folder in sync with a paired device")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the peer and keep syncing until interrupted
    Run {
        /// Folder to sync (overrides sync_root)
        #[arg(long)]
        root: Option<PathBuf>,
        /// Peer WebSocket URL (overrides server_url)
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the manifest of a directory
    Scan {
        /// Directory to scan (defaults to sync_root)
        dir: Option<PathBuf>,
    },
    /// Send files to the peer without syncing them
    Send {
        /// Files to send
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Peer WebSocket URL (overrides server_url)
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the SHA-256 digest of a file
    Hash {
        /// File to hash
        file: PathBuf,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (server_url, sync_root, device_name, ...)
        key: String,
        /// Configuration value ("none" clears optional keys)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    match cli.command {
        Commands::Config { command } => handle_config_command(command, &output),
        Commands::Scan { dir } => commands::scan::scan(dir, &output).await,
        Commands::Send { files, url } => commands::send::send(files, url, &output).await,
        Commands::Hash { file } => commands::hash::hash(file, &output).await,
        Commands::Run { root, url } => {
            let config = Config::load()?;
            init_logging(&config, cli.verbose);
            commands::run::run(config, root, url, &output).await
        }
    }
}

fn handle_config_command(command: Option<ConfigCommands>, output: &Output) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(output),
        Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
    }
}

/// Initialize logging
///
/// SYNCSPHERE_LOG takes a full filter directive; otherwise `-v` picks the
/// level. Logs go to stderr, or to config.log_file when set.
fn init_logging(config: &Config, verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_env("SYNCSPHERE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(format!("syncsphere_core={},syncsphere={}", level, level))
    });

    let Some(ref log_path) = config.log_file else {
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

    // Initialize file-based logging (ignore error if already initialized)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .try_init();

    tracing::info!("Logging to {:?}", log_path);
}
