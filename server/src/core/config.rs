use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::cli::CliConfig;
use super::constants::{
    CONFIG_FILE_NAME, DEFAULT_AGGREGATION_INTERVAL_SECS, DEFAULT_BUCKET_WIDTH_SECS, DEFAULT_HOST,
    DEFAULT_LIVE_THRESHOLD_SECS, DEFAULT_LIVE_TIMEOUT_SECS, DEFAULT_LOOKBACK_BUCKETS,
    DEFAULT_PORT, DEFAULT_WINDOW_TIMEOUT_SECS,
};
use crate::domain::graph::collapse::DEFAULT_MAX_HOPS;
use crate::domain::graph::{JobConfig, RouterConfig};

// =============================================================================
// Store Backend Enum
// =============================================================================

/// Store backend for spans and bucketed aggregates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Duckdb,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Duckdb => write!(f, "duckdb"),
        }
    }
}

// =============================================================================
// Config Sections
// =============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Built-in scheduled aggregation on/off
    pub enabled: bool,
    pub bucket_width_secs: u64,
    pub interval_secs: u64,
    pub lookback_buckets: u32,
    pub window_timeout_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket_width_secs: DEFAULT_BUCKET_WIDTH_SECS,
            interval_secs: DEFAULT_AGGREGATION_INTERVAL_SECS,
            lookback_buckets: DEFAULT_LOOKBACK_BUCKETS,
            window_timeout_secs: DEFAULT_WINDOW_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    pub live_threshold_secs: u64,
    pub live_timeout_secs: u64,
    pub max_hops: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            live_threshold_secs: DEFAULT_LIVE_THRESHOLD_SECS,
            live_timeout_secs: DEFAULT_LIVE_TIMEOUT_SECS,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Optional pricing table file; the embedded table is used when unset
    pub table_path: Option<PathBuf>,
}

// =============================================================================
// App Config
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub debug: bool,
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub aggregation: AggregationConfig,
    pub query: QueryConfig,
    pub pricing: PricingConfig,
}

impl AppConfig {
    /// Load configuration: config file (if present), then CLI/env overrides.
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let mut config = match Self::resolve_config_path(cli) {
            Some(path) => {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                let config: AppConfig = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
                tracing::debug!(path = %path.display(), "Loaded config file");
                config
            }
            None => AppConfig::default(),
        };

        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Explicit CLI path wins; otherwise the well-known file in the working
    /// directory is picked up when it exists.
    fn resolve_config_path(cli: &CliConfig) -> Option<PathBuf> {
        if let Some(path) = &cli.config {
            return Some(path.clone());
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() { Some(local) } else { None }
    }

    fn apply_cli(&mut self, cli: &CliConfig) {
        if cli.debug {
            self.debug = true;
        }
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(backend) = cli.store_backend {
            self.store.backend = backend;
        }
        if let Some(secs) = cli.bucket_width_secs {
            self.aggregation.bucket_width_secs = secs;
        }
        if let Some(secs) = cli.aggregation_interval_secs {
            if secs == 0 {
                self.aggregation.enabled = false;
            } else {
                self.aggregation.interval_secs = secs;
            }
        }
        if let Some(enabled) = cli.aggregation_enabled {
            self.aggregation.enabled = enabled;
        }
        if let Some(buckets) = cli.lookback_buckets {
            self.aggregation.lookback_buckets = buckets;
        }
        if let Some(secs) = cli.live_threshold_secs {
            self.query.live_threshold_secs = secs;
        }
        if let Some(secs) = cli.live_timeout_secs {
            self.query.live_timeout_secs = secs;
        }
        if let Some(hops) = cli.max_hops {
            self.query.max_hops = hops;
        }
        if let Some(path) = &cli.pricing_table {
            self.pricing.table_path = Some(path.clone());
        }
    }

    fn validate(&self) -> Result<()> {
        if self.aggregation.bucket_width_secs == 0 {
            anyhow::bail!("aggregation.bucket_width_secs must be greater than zero");
        }
        if self.aggregation.lookback_buckets == 0 {
            anyhow::bail!("aggregation.lookback_buckets must be greater than zero");
        }
        Ok(())
    }

    /// Scheduling parameters for the aggregation job
    pub fn job_config(&self) -> JobConfig {
        JobConfig {
            bucket_width: Duration::from_secs(self.aggregation.bucket_width_secs),
            interval: Duration::from_secs(self.aggregation.interval_secs.max(1)),
            lookback_buckets: self.aggregation.lookback_buckets,
            window_timeout: Duration::from_secs(self.aggregation.window_timeout_secs.max(1)),
            max_hops: self.query.max_hops,
        }
    }

    /// Routing parameters for the query router
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            live_threshold: Duration::from_secs(self.query.live_threshold_secs),
            live_timeout: Duration::from_secs(self.query.live_timeout_secs.max(1)),
            max_hops: self.query.max_hops,
        }
    }
}
