//! Graph snapshot assembly from bucket rows
//!
//! Merges bucket rows keyed by `(source, target)` / node label across buckets
//! and derives the externally visible metrics. Derived ratios are recomputed
//! from merged totals, never averaged across buckets, so the weighted average
//! stays exact. Snapshots are constructed fresh per query and never persisted.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::data::types::{BucketRows, EdgeAggregate, NodeAggregate, ParticipantKind};

/// Queried time range, echoed back on the snapshot
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Aggregated delegation edge view
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EdgeView {
    pub source: String,
    pub target: String,
    pub call_count: i64,
    pub error_count: i64,
    pub error_rate_pct: f64,
    pub avg_duration_ms: f64,
    /// Conservative upper bound: the maximum per-bucket maximum, not an exact
    /// percentile merge
    pub p95_duration_ms: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    /// Summed across buckets; executions straddling a bucket boundary are
    /// counted once per bucket (documented approximation)
    pub distinct_executions: i64,
}

/// Aggregated participant view
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NodeView {
    pub id: String,
    pub kind: ParticipantKind,
    pub call_count: i64,
    pub error_count: i64,
    pub error_rate_pct: f64,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub is_root: bool,
    pub is_leaf: bool,
    pub tool_call_count: i64,
    pub model_call_count: i64,
}

/// The externally visible query result
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GraphSnapshot {
    pub time_range: TimeRange,
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
}

fn rate_pct(error_count: i64, call_count: i64) -> f64 {
    if call_count == 0 {
        0.0
    } else {
        100.0 * error_count as f64 / call_count as f64
    }
}

fn avg(sum: i64, count: i64) -> f64 {
    if count == 0 { 0.0 } else { sum as f64 / count as f64 }
}

/// Merge bucket rows into one snapshot for the given range.
///
/// Counts and sums accumulate; `p95` takes the maximum across buckets;
/// `distinct_executions` is summed (boundary overcount accepted). Root/leaf
/// flags are recomputed from the final merged edge set, not carried from any
/// single bucket.
pub fn from_bucket_rows(rows: BucketRows, time_range: TimeRange) -> GraphSnapshot {
    let mut merged_edges: BTreeMap<(String, String), EdgeAggregate> = BTreeMap::new();
    for row in rows.edges {
        let key = (row.source_label.clone(), row.target_label.clone());
        match merged_edges.get_mut(&key) {
            Some(acc) => {
                acc.call_count += row.call_count;
                acc.error_count += row.error_count;
                acc.sum_duration_ms += row.sum_duration_ms;
                acc.max_p95_duration_ms = acc.max_p95_duration_ms.max(row.max_p95_duration_ms);
                acc.sum_input_tokens += row.sum_input_tokens;
                acc.sum_output_tokens += row.sum_output_tokens;
                acc.sum_cost += row.sum_cost;
                acc.distinct_executions += row.distinct_executions;
            }
            None => {
                merged_edges.insert(key, row);
            }
        }
    }

    let mut merged_nodes: BTreeMap<String, NodeAggregate> = BTreeMap::new();
    for row in rows.nodes {
        match merged_nodes.get_mut(&row.node_label) {
            Some(acc) => {
                acc.call_count += row.call_count;
                acc.error_count += row.error_count;
                acc.sum_duration_ms += row.sum_duration_ms;
                acc.max_p95_duration_ms = acc.max_p95_duration_ms.max(row.max_p95_duration_ms);
                acc.sum_input_tokens += row.sum_input_tokens;
                acc.sum_output_tokens += row.sum_output_tokens;
                acc.sum_cost += row.sum_cost;
                acc.distinct_executions += row.distinct_executions;
                acc.tool_call_count += row.tool_call_count;
                acc.model_call_count += row.model_call_count;
            }
            None => {
                merged_nodes.insert(row.node_label.clone(), row);
            }
        }
    }

    // Topology flags come from the merged edge set: a node that is a target in
    // any bucket of the window is not a root of the window.
    let mut has_incoming: HashSet<String> = HashSet::new();
    let mut has_outgoing: HashSet<String> = HashSet::new();
    for (source, target) in merged_edges.keys() {
        has_outgoing.insert(source.clone());
        has_incoming.insert(target.clone());
    }

    let nodes = merged_nodes
        .values()
        .map(|row| NodeView {
            id: row.node_label.clone(),
            kind: row.kind,
            call_count: row.call_count,
            error_count: row.error_count,
            error_rate_pct: rate_pct(row.error_count, row.call_count),
            avg_duration_ms: avg(row.sum_duration_ms, row.call_count),
            p95_duration_ms: row.max_p95_duration_ms,
            total_tokens: row.sum_input_tokens + row.sum_output_tokens,
            total_cost: row.sum_cost,
            is_root: !has_incoming.contains(&row.node_label),
            is_leaf: !has_outgoing.contains(&row.node_label),
            tool_call_count: row.tool_call_count,
            model_call_count: row.model_call_count,
        })
        .collect();

    let edges = merged_edges
        .into_values()
        .map(|row| EdgeView {
            source: row.source_label,
            target: row.target_label,
            call_count: row.call_count,
            error_count: row.error_count,
            error_rate_pct: rate_pct(row.error_count, row.call_count),
            avg_duration_ms: avg(row.sum_duration_ms, row.call_count),
            p95_duration_ms: row.max_p95_duration_ms,
            total_tokens: row.sum_input_tokens + row.sum_output_tokens,
            total_cost: row.sum_cost,
            distinct_executions: row.distinct_executions,
        })
        .collect();

    GraphSnapshot {
        time_range,
        nodes,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::AGGREGATE_SCHEMA_VERSION;
    use chrono::TimeZone;

    fn bucket(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    fn range() -> TimeRange {
        TimeRange {
            start: bucket(0),
            end: bucket(23),
        }
    }

    fn edge_row(
        bucket_start: DateTime<Utc>,
        source: &str,
        target: &str,
        call_count: i64,
        error_count: i64,
        sum_duration_ms: i64,
        max_p95: i64,
    ) -> EdgeAggregate {
        EdgeAggregate {
            bucket_start,
            bucket_width_secs: 3600,
            source_label: source.to_string(),
            target_label: target.to_string(),
            call_count,
            error_count,
            sum_duration_ms,
            max_p95_duration_ms: max_p95,
            sum_input_tokens: 100,
            sum_output_tokens: 50,
            sum_cost: 0.01,
            distinct_executions: 1,
            schema_version: AGGREGATE_SCHEMA_VERSION,
        }
    }

    fn node_row(
        bucket_start: DateTime<Utc>,
        label: &str,
        is_root: bool,
        is_leaf: bool,
    ) -> NodeAggregate {
        NodeAggregate {
            bucket_start,
            bucket_width_secs: 3600,
            node_label: label.to_string(),
            kind: ParticipantKind::Agent,
            call_count: 2,
            error_count: 1,
            sum_duration_ms: 100,
            max_p95_duration_ms: 80,
            sum_input_tokens: 10,
            sum_output_tokens: 5,
            sum_cost: 0.001,
            distinct_executions: 1,
            tool_call_count: 1,
            model_call_count: 0,
            is_root,
            is_leaf,
            schema_version: AGGREGATE_SCHEMA_VERSION,
        }
    }

    #[test]
    fn test_merged_average_is_weighted() {
        // 10 calls / 1000ms and 5 calls / 1000ms merge to 2000/15, not the
        // average of the per-bucket averages (100 and 200)
        let rows = BucketRows {
            edges: vec![
                edge_row(bucket(1), "a", "b", 10, 0, 1000, 150),
                edge_row(bucket(2), "a", "b", 5, 0, 1000, 400),
            ],
            nodes: vec![],
        };
        let snapshot = from_bucket_rows(rows, range());

        assert_eq!(snapshot.edges.len(), 1);
        let edge = &snapshot.edges[0];
        assert_eq!(edge.call_count, 15);
        assert!((edge.avg_duration_ms - 2000.0 / 15.0).abs() < 1e-9);
        assert_eq!(edge.p95_duration_ms, 400, "p95 merges by max, never averaged");
    }

    #[test]
    fn test_error_rate_recomputed_post_merge() {
        let rows = BucketRows {
            edges: vec![
                edge_row(bucket(1), "a", "b", 8, 2, 100, 10),
                edge_row(bucket(2), "a", "b", 2, 2, 100, 10),
            ],
            nodes: vec![],
        };
        let snapshot = from_bucket_rows(rows, range());
        let edge = &snapshot.edges[0];
        assert_eq!(edge.error_count, 4);
        assert!((edge.error_rate_pct - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_distinct_executions_summed_across_buckets() {
        // Boundary overcount is accepted by design
        let rows = BucketRows {
            edges: vec![
                edge_row(bucket(1), "a", "b", 1, 0, 10, 10),
                edge_row(bucket(2), "a", "b", 1, 0, 10, 10),
            ],
            nodes: vec![],
        };
        let snapshot = from_bucket_rows(rows, range());
        assert_eq!(snapshot.edges[0].distinct_executions, 2);
    }

    #[test]
    fn test_flags_recomputed_from_merged_edges() {
        // In bucket 1, "b" looks like a root (no incoming edge there); the
        // merged window has a->b, so "b" must not be a root of the window.
        let rows = BucketRows {
            edges: vec![
                edge_row(bucket(1), "b", "c", 1, 0, 10, 10),
                edge_row(bucket(2), "a", "b", 1, 0, 10, 10),
            ],
            nodes: vec![
                node_row(bucket(1), "b", true, false),
                node_row(bucket(2), "a", true, false),
                node_row(bucket(1), "c", false, true),
            ],
        };
        let snapshot = from_bucket_rows(rows, range());

        let get = |id: &str| snapshot.nodes.iter().find(|n| n.id == id).unwrap();
        assert!(get("a").is_root);
        assert!(!get("b").is_root, "stored bucket-local flag must be ignored");
        assert!(!get("b").is_leaf);
        assert!(get("c").is_leaf);
    }

    #[test]
    fn test_zero_calls_yield_zero_rates() {
        let mut row = edge_row(bucket(1), "a", "b", 0, 0, 0, 0);
        row.distinct_executions = 0;
        let rows = BucketRows {
            edges: vec![row],
            nodes: vec![],
        };
        let snapshot = from_bucket_rows(rows, range());
        assert_eq!(snapshot.edges[0].error_rate_pct, 0.0);
        assert_eq!(snapshot.edges[0].avg_duration_ms, 0.0);
    }

    #[test]
    fn test_node_totals_merge() {
        let rows = BucketRows {
            edges: vec![],
            nodes: vec![
                node_row(bucket(1), "a", true, true),
                node_row(bucket(2), "a", true, true),
            ],
        };
        let snapshot = from_bucket_rows(rows, range());
        assert_eq!(snapshot.nodes.len(), 1);
        let node = &snapshot.nodes[0];
        assert_eq!(node.call_count, 4);
        assert_eq!(node.total_tokens, 30);
        assert_eq!(node.tool_call_count, 2);
        // No edges in the window: node is both root and leaf
        assert!(node.is_root);
        assert!(node.is_leaf);
    }
}
