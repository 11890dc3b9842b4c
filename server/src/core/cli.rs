use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::StoreBackend;
use super::constants::{
    ENV_AGGREGATION_ENABLED, ENV_AGGREGATION_INTERVAL_SECS, ENV_BUCKET_WIDTH_SECS, ENV_CONFIG,
    ENV_DEBUG, ENV_HOST, ENV_LIVE_THRESHOLD_SECS, ENV_LIVE_TIMEOUT_SECS, ENV_LOOKBACK_BUCKETS,
    ENV_MAX_HOPS, ENV_PORT, ENV_PRICING_TABLE, ENV_STORE_BACKEND,
};

#[derive(Parser)]
#[command(name = "agentgraph")]
#[command(version, about = "Delegation-graph telemetry aggregator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Enable debug logging of ingested batches
    #[arg(long, global = true, env = ENV_DEBUG)]
    pub debug: bool,

    /// Store backend (memory or duckdb)
    #[arg(long, global = true, env = ENV_STORE_BACKEND, value_parser = parse_store_backend)]
    pub store_backend: Option<StoreBackend>,

    /// Pre-aggregation bucket width in seconds
    #[arg(long, global = true, env = ENV_BUCKET_WIDTH_SECS)]
    pub bucket_width_secs: Option<u64>,

    /// Scheduled aggregation interval in seconds (0 = disabled)
    #[arg(long, global = true, env = ENV_AGGREGATION_INTERVAL_SECS)]
    pub aggregation_interval_secs: Option<u64>,

    /// Enable or disable the built-in aggregation schedule
    #[arg(long, global = true, env = ENV_AGGREGATION_ENABLED)]
    pub aggregation_enabled: Option<bool>,

    /// Complete buckets scanned per aggregation run
    #[arg(long, global = true, env = ENV_LOOKBACK_BUCKETS)]
    pub lookback_buckets: Option<u32>,

    /// Ranges below this many seconds use the exact live path
    #[arg(long, global = true, env = ENV_LIVE_THRESHOLD_SECS)]
    pub live_threshold_secs: Option<u64>,

    /// Wall-clock budget for a live query in seconds
    #[arg(long, global = true, env = ENV_LIVE_TIMEOUT_SECS)]
    pub live_timeout_secs: Option<u64>,

    /// Hop budget for the collapse traversal
    #[arg(long, global = true, env = ENV_MAX_HOPS)]
    pub max_hops: Option<usize>,

    /// Path to a pricing table JSON file (overrides the embedded table)
    #[arg(long, global = true, env = ENV_PRICING_TABLE)]
    pub pricing_table: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server (default)
    Start,
    /// System maintenance commands
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum SystemCommands {
    /// Delete the local data directory
    Prune {
        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

fn parse_store_backend(s: &str) -> Result<StoreBackend, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(StoreBackend::Memory),
        "duckdb" => Ok(StoreBackend::Duckdb),
        _ => Err(format!(
            "Invalid store backend: {}. Use 'memory' or 'duckdb'",
            s
        )),
    }
}

/// CLI overrides applied on top of the config file
#[derive(Debug, Default, Clone)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub debug: bool,
    pub store_backend: Option<StoreBackend>,
    pub bucket_width_secs: Option<u64>,
    pub aggregation_interval_secs: Option<u64>,
    pub aggregation_enabled: Option<bool>,
    pub lookback_buckets: Option<u32>,
    pub live_threshold_secs: Option<u64>,
    pub live_timeout_secs: Option<u64>,
    pub max_hops: Option<usize>,
    pub pricing_table: Option<PathBuf>,
}

/// Parse command line arguments into overrides and the selected command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        config: cli.config,
        debug: cli.debug,
        store_backend: cli.store_backend,
        bucket_width_secs: cli.bucket_width_secs,
        aggregation_interval_secs: cli.aggregation_interval_secs,
        aggregation_enabled: cli.aggregation_enabled,
        lookback_buckets: cli.lookback_buckets,
        live_threshold_secs: cli.live_threshold_secs,
        live_timeout_secs: cli.live_timeout_secs,
        max_hops: cli.max_hops,
        pricing_table: cli.pricing_table,
    };
    (config, cli.command)
}
