//! Tessera CLI
//!
//! Operator tool for the Tessera storage core.
//!
//! # Commands
//! - `check-config` - Load, validate and summarise a configuration file
//! - `lookup` - Look up node records by ID
//! - `select` - Run node selection against the reputation database
//! - `watch` - Refresh the reputation database from observed nodes
//! - `roundtrip` - Store and read back a file on an in-process cluster
//!
//! # Configuration
//! Config file: `tessera.toml` (or `--config` / `TESSERA_CONFIG`), with
//! `TESSERA_*` environment overrides applied on top.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tessera_core::{Config, TesseraError};

mod commands;

use commands::{config, nodes, roundtrip};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Tessera storage core tool")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "TESSERA_CONFIG", default_value = "tessera.toml")]
    config: PathBuf,

    /// Emit JSON logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print a summary
    CheckConfig,

    /// Look up node records in the reputation database
    Lookup {
        /// Node IDs (base58)
        #[arg(long)]
        ids: String,

        /// Separator between IDs
        #[arg(long, default_value = ",")]
        delimiter: String,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Select storage nodes that pass the configured reputation thresholds
    Select {
        /// Number of nodes to select
        #[arg(short, long)]
        count: usize,

        /// Node IDs (base58, comma separated) to exclude
        #[arg(long)]
        exclude: Option<String>,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge observed nodes into the reputation database on the configured
    /// refresh interval until interrupted
    Watch {
        /// JSON array of `{"id": "<base58>", "address": "<host:port>"}`,
        /// re-read on every pass
        observed: PathBuf,
    },

    /// Store a file on an in-process cluster and read it back
    Roundtrip {
        /// File to store
        path: PathBuf,

        /// Simulated storage nodes
        #[arg(long, default_value = "95")]
        nodes: usize,

        /// Simulated nodes that refuse every transfer
        #[arg(long, default_value = "0")]
        offline: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let cfg = match load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) if is_configuration(&e) => {
            eprintln!("Error: {:#}", e);
            eprintln!(
                "Fix {} or the TESSERA_* environment, then run `tessera check-config`",
                cli.config.display()
            );
            std::process::exit(2);
        }
        Err(e) => return Err(e),
    };

    match cli.command {
        Commands::CheckConfig => {
            config::check(&cli.config, &cfg)?;
        }

        Commands::Lookup {
            ids,
            delimiter,
            json,
        } => {
            let lookup = tessera_core::config::LookupConfig {
                node_ids: ids,
                delimiter,
            };
            nodes::lookup(&cfg, &lookup, json).await?;
        }

        Commands::Select {
            count,
            exclude,
            json,
        } => {
            nodes::select(&cfg, count, exclude.as_deref(), json).await?;
        }

        Commands::Watch { observed } => {
            nodes::watch(&cfg, observed).await?;
        }

        Commands::Roundtrip {
            path,
            nodes,
            offline,
        } => {
            let options = roundtrip::RoundtripConfig {
                path,
                nodes,
                offline,
            };
            roundtrip::run(&cfg, options).await?;
        }
    }

    Ok(())
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// A missing file means defaults; a broken one is an error
fn load_config(path: &PathBuf) -> Result<Config> {
    let cfg = if path.exists() {
        Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?
    } else {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        Config::default()
    };

    let cfg = cfg
        .with_env_overrides()
        .context("invalid environment override")?;
    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

/// Whether `error` comes from a bad setting rather than an unreadable file
fn is_configuration(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<TesseraError>()
        .is_some_and(TesseraError::is_configuration)
}
