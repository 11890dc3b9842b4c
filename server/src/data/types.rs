//! Shared data types across store backends
//!
//! These types cross the storage boundary: normalized span records handed over
//! by the upstream telemetry collaborator, and the bucketed aggregate rows the
//! engine reads and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Schema version stamped on every aggregate row.
///
/// A bucket upsert that finds existing rows with a different version raises a
/// conflict for that bucket instead of silently mixing row shapes.
pub const AGGREGATE_SCHEMA_VERSION: i32 = 1;

// ============================================================================
// PARTICIPANT KIND
// ============================================================================

/// Classification of a span's participant in the delegation graph.
///
/// `PassThrough` spans carry no delegation meaning (SDK plumbing, framework
/// glue) and are collapsed during traversal; all other kinds are significant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    #[default]
    Agent,
    SubAgent,
    Tool,
    Model,
    PassThrough,
}

impl ParticipantKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ParticipantKind::Agent => "agent",
            ParticipantKind::SubAgent => "sub_agent",
            ParticipantKind::Tool => "tool",
            ParticipantKind::Model => "model",
            ParticipantKind::PassThrough => "pass_through",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(ParticipantKind::Agent),
            "sub_agent" => Some(ParticipantKind::SubAgent),
            "tool" => Some(ParticipantKind::Tool),
            "model" => Some(ParticipantKind::Model),
            "pass_through" => Some(ParticipantKind::PassThrough),
            _ => None,
        }
    }

    /// True for every kind that participates in the delegation graph.
    pub fn is_significant(&self) -> bool {
        !matches!(self, ParticipantKind::PassThrough)
    }
}

impl std::fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SPAN RECORD
// ============================================================================

/// One normalized span from a multi-agent execution trace.
///
/// Owned by the ingestion collaborator; the engine treats it as read-only
/// input grouped by `execution_id`. Kind classification and label resolution
/// have already happened upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SpanRecord {
    pub span_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub execution_id: String,
    pub participant_label: String,
    pub participant_kind: ParticipantKind,
    #[serde(default)]
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub model_identifier: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub status_message: Option<String>,
}

// ============================================================================
// AGGREGATE ROWS
// ============================================================================

/// One aggregated delegation edge for one time bucket.
///
/// A row is fully owned by exactly one bucket and replaced wholesale on
/// re-aggregation. `sum_duration_ms / call_count` is the only statistically
/// exact derived metric; `max_p95_duration_ms` is a conservative max-of-maxes
/// stand-in, never an exact percentile merge.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeAggregate {
    pub bucket_start: DateTime<Utc>,
    pub bucket_width_secs: i64,
    pub source_label: String,
    pub target_label: String,
    pub call_count: i64,
    pub error_count: i64,
    pub sum_duration_ms: i64,
    pub max_p95_duration_ms: i64,
    pub sum_input_tokens: i64,
    pub sum_output_tokens: i64,
    pub sum_cost: f64,
    /// Distinct executions within this bucket. Summing across merged buckets
    /// overcounts executions that straddle a boundary (documented
    /// approximation).
    pub distinct_executions: i64,
    pub schema_version: i32,
}

/// One aggregated participant for one time bucket.
///
/// Same aggregation pattern as [`EdgeAggregate`], keyed by the participant
/// label, plus downstream call-type counts and the bucket-local root/leaf
/// flags. The flags are recomputed from the merged edge set at query time;
/// the stored values only describe this bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAggregate {
    pub bucket_start: DateTime<Utc>,
    pub bucket_width_secs: i64,
    pub node_label: String,
    pub kind: ParticipantKind,
    pub call_count: i64,
    pub error_count: i64,
    pub sum_duration_ms: i64,
    pub max_p95_duration_ms: i64,
    pub sum_input_tokens: i64,
    pub sum_output_tokens: i64,
    pub sum_cost: f64,
    pub distinct_executions: i64,
    pub tool_call_count: i64,
    pub model_call_count: i64,
    pub is_root: bool,
    pub is_leaf: bool,
    pub schema_version: i32,
}

/// Unmerged bucket rows returned by a range query. Merging across buckets is
/// the query router's job, not the store's.
#[derive(Debug, Clone, Default)]
pub struct BucketRows {
    pub edges: Vec<EdgeAggregate>,
    pub nodes: Vec<NodeAggregate>,
}

impl BucketRows {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.nodes.is_empty()
    }
}
