//! Bucketed pre-aggregation of delegation observations
//!
//! Folds a stream of edge and node observations into fixed-width time bucket
//! rows. Every pass is a pure function from (observations, already-covered
//! bucket keys) to replacement rows; persistence is the only stateful
//! boundary, and it is replace-semantics.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::collapse::{DelegationObservation, NodeObservation};
use crate::data::types::{
    AGGREGATE_SCHEMA_VERSION, EdgeAggregate, NodeAggregate, ParticipantKind,
};
use crate::utils::time::floor_to_bucket;

/// Replacement rows produced by one aggregation pass
#[derive(Debug, Clone, Default)]
pub struct BucketBatch {
    pub edges: Vec<EdgeAggregate>,
    pub nodes: Vec<NodeAggregate>,
}

impl BucketBatch {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.nodes.is_empty()
    }

    /// Bucket keys present in this batch
    pub fn bucket_starts(&self) -> BTreeSet<DateTime<Utc>> {
        self.edges
            .iter()
            .map(|e| e.bucket_start)
            .chain(self.nodes.iter().map(|n| n.bucket_start))
            .collect()
    }
}

#[derive(Default)]
struct MetricAcc {
    call_count: i64,
    error_count: i64,
    sum_duration_ms: i64,
    max_duration_ms: i64,
    sum_input_tokens: i64,
    sum_output_tokens: i64,
    sum_cost: f64,
    executions: HashSet<String>,
}

impl MetricAcc {
    fn observe(
        &mut self,
        execution_id: &str,
        duration_ms: i64,
        input_tokens: i64,
        output_tokens: i64,
        is_error: bool,
        cost: f64,
    ) {
        self.call_count += 1;
        if is_error {
            self.error_count += 1;
        }
        self.sum_duration_ms += duration_ms;
        self.max_duration_ms = self.max_duration_ms.max(duration_ms);
        self.sum_input_tokens += input_tokens;
        self.sum_output_tokens += output_tokens;
        self.sum_cost += cost;
        if !self.executions.contains(execution_id) {
            self.executions.insert(execution_id.to_string());
        }
    }
}

#[derive(Default)]
struct NodeAcc {
    kind: Option<ParticipantKind>,
    metrics: MetricAcc,
    tool_call_count: i64,
    model_call_count: i64,
}

/// Fold observations into fixed-width bucket rows.
///
/// Each observation's timestamp is floored to `bucket_width` to pick its
/// bucket. Observations landing in an `already_covered` bucket are excluded
/// from re-summation; paired with the store's replace-on-upsert contract this
/// makes retried or overlapping scheduled runs idempotent.
///
/// `max_p95_duration_ms` is filled with the bucket's maximum observed
/// duration, a deliberately conservative stand-in for a true percentile.
/// `distinct_executions` is exact within one bucket only.
pub fn aggregate(
    edges: &[DelegationObservation],
    nodes: &[NodeObservation],
    bucket_width: Duration,
    already_covered: &BTreeSet<DateTime<Utc>>,
) -> BucketBatch {
    let width_secs = (bucket_width.as_secs() as i64).max(1);

    let mut edge_groups: BTreeMap<(DateTime<Utc>, String, String), MetricAcc> = BTreeMap::new();
    for obs in edges {
        let bucket = floor_to_bucket(obs.timestamp, bucket_width);
        if already_covered.contains(&bucket) {
            continue;
        }
        edge_groups
            .entry((bucket, obs.source_label.clone(), obs.target_label.clone()))
            .or_default()
            .observe(
                &obs.execution_id,
                obs.duration_ms,
                obs.input_tokens,
                obs.output_tokens,
                obs.is_error,
                obs.cost,
            );
    }

    let mut node_groups: BTreeMap<(DateTime<Utc>, String), NodeAcc> = BTreeMap::new();
    for obs in nodes {
        let bucket = floor_to_bucket(obs.timestamp, bucket_width);
        if already_covered.contains(&bucket) {
            continue;
        }
        let acc = node_groups
            .entry((bucket, obs.label.clone()))
            .or_default();
        acc.kind = Some(obs.kind);
        acc.metrics.observe(
            &obs.execution_id,
            obs.duration_ms,
            obs.input_tokens,
            obs.output_tokens,
            obs.is_error,
            obs.cost,
        );
    }

    // Downstream call-type counts, attributed to the source node in the
    // edge's bucket
    for obs in edges {
        let bucket = floor_to_bucket(obs.timestamp, bucket_width);
        if already_covered.contains(&bucket) {
            continue;
        }
        let acc = node_groups
            .entry((bucket, obs.source_label.clone()))
            .or_default();
        match obs.target_kind {
            ParticipantKind::Tool => acc.tool_call_count += 1,
            ParticipantKind::Model => acc.model_call_count += 1,
            _ => {}
        }
        acc.kind.get_or_insert(obs.source_kind);
    }

    // Bucket-local topology flags from that bucket's own edge set
    let mut incoming: HashSet<(DateTime<Utc>, String)> = HashSet::new();
    let mut outgoing: HashSet<(DateTime<Utc>, String)> = HashSet::new();
    for (bucket, source, target) in edge_groups.keys() {
        outgoing.insert((*bucket, source.clone()));
        incoming.insert((*bucket, target.clone()));
    }

    let edges = edge_groups
        .into_iter()
        .map(|((bucket, source, target), acc)| EdgeAggregate {
            bucket_start: bucket,
            bucket_width_secs: width_secs,
            source_label: source,
            target_label: target,
            call_count: acc.call_count,
            error_count: acc.error_count,
            sum_duration_ms: acc.sum_duration_ms,
            max_p95_duration_ms: acc.max_duration_ms,
            sum_input_tokens: acc.sum_input_tokens,
            sum_output_tokens: acc.sum_output_tokens,
            sum_cost: acc.sum_cost,
            distinct_executions: acc.executions.len() as i64,
            schema_version: AGGREGATE_SCHEMA_VERSION,
        })
        .collect();

    let nodes = node_groups
        .into_iter()
        .map(|((bucket, label), acc)| {
            let is_root = !incoming.contains(&(bucket, label.clone()));
            let is_leaf = !outgoing.contains(&(bucket, label.clone()));
            NodeAggregate {
                bucket_start: bucket,
                bucket_width_secs: width_secs,
                node_label: label,
                kind: acc.kind.unwrap_or_default(),
                call_count: acc.metrics.call_count,
                error_count: acc.metrics.error_count,
                sum_duration_ms: acc.metrics.sum_duration_ms,
                max_p95_duration_ms: acc.metrics.max_duration_ms,
                sum_input_tokens: acc.metrics.sum_input_tokens,
                sum_output_tokens: acc.metrics.sum_output_tokens,
                sum_cost: acc.metrics.sum_cost,
                distinct_executions: acc.metrics.executions.len() as i64,
                tool_call_count: acc.tool_call_count,
                model_call_count: acc.model_call_count,
                is_root,
                is_leaf,
                schema_version: AGGREGATE_SCHEMA_VERSION,
            }
        })
        .collect();

    BucketBatch { edges, nodes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HOUR: Duration = Duration::from_secs(3600);

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, min, 0).unwrap()
    }

    fn edge_obs(
        exec: &str,
        source: &str,
        target: &str,
        target_kind: ParticipantKind,
        duration_ms: i64,
        is_error: bool,
        ts: DateTime<Utc>,
    ) -> DelegationObservation {
        DelegationObservation {
            execution_id: exec.to_string(),
            source_label: source.to_string(),
            source_kind: ParticipantKind::Agent,
            target_label: target.to_string(),
            target_kind,
            duration_ms,
            input_tokens: 100,
            output_tokens: 50,
            is_error,
            cost: 0.001,
            timestamp: ts,
        }
    }

    fn node_obs(exec: &str, label: &str, ts: DateTime<Utc>) -> NodeObservation {
        NodeObservation {
            execution_id: exec.to_string(),
            label: label.to_string(),
            kind: ParticipantKind::Agent,
            duration_ms: 80,
            input_tokens: 10,
            output_tokens: 5,
            is_error: false,
            cost: 0.0,
            timestamp: ts,
        }
    }

    #[test]
    fn test_groups_by_bucket_and_edge_key() {
        let edges = vec![
            edge_obs("e1", "a", "b", ParticipantKind::Tool, 100, false, at(10, 5)),
            edge_obs("e1", "a", "b", ParticipantKind::Tool, 200, true, at(10, 40)),
            edge_obs("e2", "a", "b", ParticipantKind::Tool, 300, false, at(11, 5)),
        ];
        let batch = aggregate(&edges, &[], HOUR, &BTreeSet::new());

        assert_eq!(batch.edges.len(), 2);
        let first = &batch.edges[0];
        assert_eq!(first.bucket_start, at(10, 0));
        assert_eq!(first.call_count, 2);
        assert_eq!(first.error_count, 1);
        assert_eq!(first.sum_duration_ms, 300);
        assert_eq!(first.max_p95_duration_ms, 200);
        assert_eq!(first.sum_input_tokens, 200);
        assert_eq!(first.distinct_executions, 1);

        let second = &batch.edges[1];
        assert_eq!(second.bucket_start, at(11, 0));
        assert_eq!(second.call_count, 1);
    }

    #[test]
    fn test_distinct_executions_within_bucket() {
        let edges = vec![
            edge_obs("e1", "a", "b", ParticipantKind::Tool, 100, false, at(10, 5)),
            edge_obs("e2", "a", "b", ParticipantKind::Tool, 100, false, at(10, 10)),
            edge_obs("e2", "a", "b", ParticipantKind::Tool, 100, false, at(10, 15)),
        ];
        let batch = aggregate(&edges, &[], HOUR, &BTreeSet::new());
        assert_eq!(batch.edges[0].distinct_executions, 2);
    }

    #[test]
    fn test_already_covered_bucket_excluded() {
        let edges = vec![
            edge_obs("e1", "a", "b", ParticipantKind::Tool, 100, false, at(10, 5)),
            edge_obs("e1", "a", "b", ParticipantKind::Tool, 100, false, at(11, 5)),
        ];
        let nodes = vec![node_obs("e1", "a", at(10, 5)), node_obs("e1", "a", at(11, 5))];

        let covered = BTreeSet::from([at(10, 0)]);
        let batch = aggregate(&edges, &nodes, HOUR, &covered);

        assert_eq!(batch.edges.len(), 1);
        assert_eq!(batch.edges[0].bucket_start, at(11, 0));
        assert_eq!(batch.nodes.len(), 1);
        assert_eq!(batch.nodes[0].bucket_start, at(11, 0));
    }

    #[test]
    fn test_idempotent_rerun_with_covered_bucket() {
        // Second run over identical observations, told the bucket is covered,
        // produces no replacement rows, leaving stored counts unchanged.
        let edges = vec![edge_obs(
            "e1",
            "a",
            "b",
            ParticipantKind::Tool,
            100,
            false,
            at(10, 5),
        )];
        let first = aggregate(&edges, &[], HOUR, &BTreeSet::new());
        assert_eq!(first.edges[0].call_count, 1);

        let rerun = aggregate(&edges, &[], HOUR, &first.bucket_starts());
        assert!(rerun.is_empty());
    }

    #[test]
    fn test_downstream_call_type_counts() {
        let edges = vec![
            edge_obs("e1", "a", "search", ParticipantKind::Tool, 100, false, at(10, 5)),
            edge_obs("e1", "a", "fetch", ParticipantKind::Tool, 100, false, at(10, 6)),
            edge_obs("e1", "a", "llm", ParticipantKind::Model, 100, false, at(10, 7)),
            edge_obs("e1", "a", "sub", ParticipantKind::SubAgent, 100, false, at(10, 8)),
        ];
        let nodes = vec![node_obs("e1", "a", at(10, 5))];
        let batch = aggregate(&edges, &nodes, HOUR, &BTreeSet::new());

        let a = batch.nodes.iter().find(|n| n.node_label == "a").unwrap();
        assert_eq!(a.tool_call_count, 2);
        assert_eq!(a.model_call_count, 1);
    }

    #[test]
    fn test_bucket_local_root_and_leaf_flags() {
        let edges = vec![
            edge_obs("e1", "a", "b", ParticipantKind::SubAgent, 100, false, at(10, 5)),
            edge_obs("e1", "b", "c", ParticipantKind::Tool, 100, false, at(10, 6)),
        ];
        let nodes = vec![
            node_obs("e1", "a", at(10, 1)),
            node_obs("e1", "b", at(10, 2)),
            node_obs("e1", "c", at(10, 3)),
        ];
        let batch = aggregate(&edges, &nodes, HOUR, &BTreeSet::new());

        let get = |label: &str| batch.nodes.iter().find(|n| n.node_label == label).unwrap();
        assert!(get("a").is_root);
        assert!(!get("a").is_leaf);
        assert!(!get("b").is_root);
        assert!(!get("b").is_leaf);
        assert!(!get("c").is_root);
        assert!(get("c").is_leaf);
    }

    #[test]
    fn test_error_count_never_exceeds_call_count() {
        let edges = vec![
            edge_obs("e1", "a", "b", ParticipantKind::Tool, 100, true, at(10, 5)),
            edge_obs("e1", "a", "b", ParticipantKind::Tool, 100, true, at(10, 6)),
        ];
        let batch = aggregate(&edges, &[], HOUR, &BTreeSet::new());
        assert!(batch.edges[0].error_count <= batch.edges[0].call_count);
        assert_eq!(batch.edges[0].error_count, 2);
    }

    #[test]
    fn test_whole_range_single_bucket() {
        // The live path aggregates with bucket_width = whole range
        let edges = vec![
            edge_obs("e1", "a", "b", ParticipantKind::Tool, 100, false, at(0, 5)),
            edge_obs("e2", "a", "b", ParticipantKind::Tool, 300, false, at(23, 55)),
        ];
        let day = Duration::from_secs(86400);
        let batch = aggregate(&edges, &[], day, &BTreeSet::new());
        assert_eq!(batch.edges.len(), 1);
        assert_eq!(batch.edges[0].call_count, 2);
        assert_eq!(batch.edges[0].distinct_executions, 2);
    }
}
