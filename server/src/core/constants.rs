// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "AgentGraph";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "agentgraph";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".agentgraph";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "agentgraph.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "AGENTGRAPH_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "AGENTGRAPH_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "AGENTGRAPH_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "AGENTGRAPH_LOG";

/// Environment variable for debug mode
pub const ENV_DEBUG: &str = "AGENTGRAPH_DEBUG";

// =============================================================================
// Environment Variables - Storage
// =============================================================================

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "AGENTGRAPH_DATA_DIR";

/// Environment variable for store backend selection
pub const ENV_STORE_BACKEND: &str = "AGENTGRAPH_STORE_BACKEND";

// =============================================================================
// Environment Variables - Aggregation & Query
// =============================================================================

pub const ENV_BUCKET_WIDTH_SECS: &str = "AGENTGRAPH_BUCKET_WIDTH_SECS";
pub const ENV_AGGREGATION_INTERVAL_SECS: &str = "AGENTGRAPH_AGGREGATION_INTERVAL_SECS";
pub const ENV_AGGREGATION_ENABLED: &str = "AGENTGRAPH_AGGREGATION_ENABLED";
pub const ENV_LOOKBACK_BUCKETS: &str = "AGENTGRAPH_LOOKBACK_BUCKETS";
pub const ENV_LIVE_THRESHOLD_SECS: &str = "AGENTGRAPH_LIVE_THRESHOLD_SECS";
pub const ENV_LIVE_TIMEOUT_SECS: &str = "AGENTGRAPH_LIVE_TIMEOUT_SECS";
pub const ENV_MAX_HOPS: &str = "AGENTGRAPH_MAX_HOPS";
pub const ENV_PRICING_TABLE: &str = "AGENTGRAPH_PRICING_TABLE";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 5460;

// =============================================================================
// Aggregation & Query Defaults
// =============================================================================

/// Default pre-aggregation bucket width (one hour)
pub const DEFAULT_BUCKET_WIDTH_SECS: u64 = 3600;

/// Default scheduled aggregation cadence (one run per bucket width)
pub const DEFAULT_AGGREGATION_INTERVAL_SECS: u64 = 3600;

/// Default number of complete buckets scanned per run
pub const DEFAULT_LOOKBACK_BUCKETS: u32 = 3;

/// Default per-window processing budget
pub const DEFAULT_WINDOW_TIMEOUT_SECS: u64 = 300;

/// Ranges below this run the exact live path (one hour)
pub const DEFAULT_LIVE_THRESHOLD_SECS: u64 = 3600;

/// Hard wall-clock budget for a live query
pub const DEFAULT_LIVE_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// DuckDB Database
// =============================================================================

/// DuckDB database filename
pub const DUCKDB_DB_FILENAME: &str = "agentgraph.db";

/// DuckDB blocking query timeout in seconds
pub const DUCKDB_QUERY_TIMEOUT_SECS: u64 = 30;

/// DuckDB checkpoint interval in seconds (5 minutes)
pub const DUCKDB_CHECKPOINT_INTERVAL_SECS: u64 = 300;

// =============================================================================
// API Limits
// =============================================================================

/// Body limit for the span intake route (32 MB)
pub const SPANS_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Maximum span records per ingest batch
pub const MAX_SPAN_BATCH: usize = 10_000;

// =============================================================================
// Shutdown
// =============================================================================

/// Seconds to wait for background tasks during graceful shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 10;
