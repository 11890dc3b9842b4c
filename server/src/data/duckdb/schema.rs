//! DuckDB schema definition
//!
//! Timestamps are stored as BIGINT microseconds since the Unix epoch so rows
//! round-trip through the driver without timestamp-format coupling; conversion
//! happens at the repository boundary.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Full schema applied to a fresh database
pub const SCHEMA: &str = r#"
-- Normalized spans handed over by the telemetry collaborator
CREATE TABLE IF NOT EXISTS spans (
    span_id             VARCHAR NOT NULL,
    parent_id           VARCHAR,
    execution_id        VARCHAR NOT NULL,
    participant_label   VARCHAR NOT NULL,
    participant_kind    VARCHAR NOT NULL,
    start_time_us       BIGINT  NOT NULL,
    duration_ms         BIGINT  NOT NULL,
    input_tokens        BIGINT  NOT NULL,
    output_tokens       BIGINT  NOT NULL,
    model_identifier    VARCHAR,
    is_error            BOOLEAN NOT NULL,
    status_message      VARCHAR
);

CREATE INDEX IF NOT EXISTS idx_spans_start_time ON spans(start_time_us);
CREATE INDEX IF NOT EXISTS idx_spans_execution ON spans(execution_id);

-- Aggregated delegation edges, one row per (bucket, source, target)
CREATE TABLE IF NOT EXISTS edge_aggregates (
    bucket_start_us     BIGINT  NOT NULL,
    bucket_width_secs   BIGINT  NOT NULL,
    source_label        VARCHAR NOT NULL,
    target_label        VARCHAR NOT NULL,
    call_count          BIGINT  NOT NULL,
    error_count         BIGINT  NOT NULL,
    sum_duration_ms     BIGINT  NOT NULL,
    max_p95_duration_ms BIGINT  NOT NULL,
    sum_input_tokens    BIGINT  NOT NULL,
    sum_output_tokens   BIGINT  NOT NULL,
    sum_cost            DOUBLE  NOT NULL,
    distinct_executions BIGINT  NOT NULL,
    schema_version      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_edge_aggregates_bucket ON edge_aggregates(bucket_start_us);

-- Aggregated participants, one row per (bucket, node)
CREATE TABLE IF NOT EXISTS node_aggregates (
    bucket_start_us     BIGINT  NOT NULL,
    bucket_width_secs   BIGINT  NOT NULL,
    node_label          VARCHAR NOT NULL,
    kind                VARCHAR NOT NULL,
    call_count          BIGINT  NOT NULL,
    error_count         BIGINT  NOT NULL,
    sum_duration_ms     BIGINT  NOT NULL,
    max_p95_duration_ms BIGINT  NOT NULL,
    sum_input_tokens    BIGINT  NOT NULL,
    sum_output_tokens   BIGINT  NOT NULL,
    sum_cost            DOUBLE  NOT NULL,
    distinct_executions BIGINT  NOT NULL,
    tool_call_count     BIGINT  NOT NULL,
    model_call_count    BIGINT  NOT NULL,
    is_root             BOOLEAN NOT NULL,
    is_leaf             BOOLEAN NOT NULL,
    schema_version      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_node_aggregates_bucket ON node_aggregates(bucket_start_us);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    id          INTEGER PRIMARY KEY,
    version     INTEGER NOT NULL,
    applied_at  BIGINT  NOT NULL,
    description VARCHAR
);
"#;
