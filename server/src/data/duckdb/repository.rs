//! DuckDB repository implementation
//!
//! Batch writes go through the Appender API inside transactions; the bucket
//! upsert runs one transaction per bucket key so the replace is atomic per
//! bucket and a conflict on one bucket leaves the others untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{Connection, params};

use super::schema::SCHEMA_VERSION;
use super::{DuckdbStore, in_transaction};
use crate::data::error::DataError;
use crate::data::traits::GraphRepository;
use crate::data::types::{
    BucketRows, EdgeAggregate, NodeAggregate, ParticipantKind, SpanRecord,
};
use crate::utils::time::micros_to_datetime;

#[async_trait]
impl GraphRepository for Arc<DuckdbStore> {
    async fn insert_spans(&self, spans: &[SpanRecord]) -> Result<(), DataError> {
        if spans.is_empty() {
            return Ok(());
        }
        let spans = spans.to_vec();
        self.run_blocking(move |conn| {
            in_transaction(conn, |conn| append_spans(conn, &spans))
        })
        .await
    }

    async fn spans_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SpanRecord>, DataError> {
        self.run_blocking(move |conn| select_spans_in_range(conn, start, end))
            .await
    }

    async fn upsert_buckets(
        &self,
        edges: &[EdgeAggregate],
        nodes: &[NodeAggregate],
    ) -> Result<(), DataError> {
        if edges.is_empty() && nodes.is_empty() {
            return Ok(());
        }
        let edges = edges.to_vec();
        let nodes = nodes.to_vec();
        self.run_blocking(move |conn| replace_buckets(conn, &edges, &nodes))
            .await
    }

    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BucketRows, DataError> {
        self.run_blocking(move |conn| {
            Ok(BucketRows {
                edges: select_edges_in_range(conn, start, end)?,
                nodes: select_nodes_in_range(conn, start, end)?,
            })
        })
        .await
    }

    async fn covered_buckets(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, DataError> {
        self.run_blocking(move |conn| select_covered_buckets(conn, start, end))
            .await
    }
}

fn append_spans(conn: &Connection, spans: &[SpanRecord]) -> Result<(), DataError> {
    let mut appender = conn.appender("spans")?;
    for span in spans {
        appender.append_row(params![
            span.span_id.as_str(),
            span.parent_id.as_deref(),
            span.execution_id.as_str(),
            span.participant_label.as_str(),
            span.participant_kind.as_str(),
            span.start_time.timestamp_micros(),
            span.duration_ms,
            span.input_tokens,
            span.output_tokens,
            span.model_identifier.as_deref(),
            span.is_error,
            span.status_message.as_deref(),
        ])?;
    }
    appender.flush()?;
    Ok(())
}

fn select_spans_in_range(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<SpanRecord>, DataError> {
    let mut stmt = conn.prepare(
        "SELECT span_id, parent_id, execution_id, participant_label, participant_kind,
                start_time_us, duration_ms, input_tokens, output_tokens,
                model_identifier, is_error, status_message
         FROM spans
         WHERE start_time_us >= ? AND start_time_us < ?",
    )?;

    let rows = stmt.query_map(
        params![start.timestamp_micros(), end.timestamp_micros()],
        |row| {
            Ok(SpanRecord {
                span_id: row.get(0)?,
                parent_id: row.get(1)?,
                execution_id: row.get(2)?,
                participant_label: row.get(3)?,
                participant_kind: parse_kind(&row.get::<_, String>(4)?),
                start_time: micros_to_datetime(row.get(5)?),
                duration_ms: row.get(6)?,
                input_tokens: row.get(7)?,
                output_tokens: row.get(8)?,
                model_identifier: row.get(9)?,
                is_error: row.get(10)?,
                status_message: row.get(11)?,
            })
        },
    )?;

    let mut spans = Vec::new();
    for row in rows {
        spans.push(row?);
    }
    Ok(spans)
}

/// Unknown kinds degrade to PassThrough so a corrupt row cannot fabricate a
/// graph participant.
fn parse_kind(s: &str) -> ParticipantKind {
    ParticipantKind::parse(s).unwrap_or_else(|| {
        tracing::warn!(kind = s, "Unknown participant kind in store");
        ParticipantKind::PassThrough
    })
}

fn replace_buckets(
    conn: &Connection,
    edges: &[EdgeAggregate],
    nodes: &[NodeAggregate],
) -> Result<(), DataError> {
    // Group rows by bucket; each bucket is replaced in its own transaction
    let mut buckets: BTreeMap<i64, (Vec<&EdgeAggregate>, Vec<&NodeAggregate>)> = BTreeMap::new();
    for edge in edges {
        buckets
            .entry(edge.bucket_start.timestamp_micros())
            .or_default()
            .0
            .push(edge);
    }
    for node in nodes {
        buckets
            .entry(node.bucket_start.timestamp_micros())
            .or_default()
            .1
            .push(node);
    }

    for (bucket_us, (bucket_edges, bucket_nodes)) in buckets {
        in_transaction(conn, |conn| {
            check_bucket_schema(conn, bucket_us)?;

            conn.execute(
                "DELETE FROM edge_aggregates WHERE bucket_start_us = ?",
                params![bucket_us],
            )?;
            conn.execute(
                "DELETE FROM node_aggregates WHERE bucket_start_us = ?",
                params![bucket_us],
            )?;

            append_edges(conn, &bucket_edges)?;
            append_nodes(conn, &bucket_nodes)?;
            Ok(())
        })?;
    }
    Ok(())
}

fn check_bucket_schema(conn: &Connection, bucket_us: i64) -> Result<(), DataError> {
    for table in ["edge_aggregates", "node_aggregates"] {
        let mut stmt = conn.prepare(&format!(
            "SELECT schema_version FROM {} WHERE bucket_start_us = ? LIMIT 1",
            table
        ))?;
        let mut rows = stmt.query(params![bucket_us])?;
        if let Some(row) = rows.next()? {
            let stored: i32 = row.get(0)?;
            if stored != SCHEMA_VERSION {
                return Err(DataError::Conflict(format!(
                    "bucket {} holds schema v{}, expected v{}",
                    micros_to_datetime(bucket_us).to_rfc3339(),
                    stored,
                    SCHEMA_VERSION
                )));
            }
        }
    }
    Ok(())
}

fn append_edges(conn: &Connection, edges: &[&EdgeAggregate]) -> Result<(), DataError> {
    if edges.is_empty() {
        return Ok(());
    }
    let mut appender = conn.appender("edge_aggregates")?;
    for edge in edges {
        appender.append_row(params![
            edge.bucket_start.timestamp_micros(),
            edge.bucket_width_secs,
            edge.source_label.as_str(),
            edge.target_label.as_str(),
            edge.call_count,
            edge.error_count,
            edge.sum_duration_ms,
            edge.max_p95_duration_ms,
            edge.sum_input_tokens,
            edge.sum_output_tokens,
            edge.sum_cost,
            edge.distinct_executions,
            edge.schema_version,
        ])?;
    }
    appender.flush()?;
    Ok(())
}

fn append_nodes(conn: &Connection, nodes: &[&NodeAggregate]) -> Result<(), DataError> {
    if nodes.is_empty() {
        return Ok(());
    }
    let mut appender = conn.appender("node_aggregates")?;
    for node in nodes {
        appender.append_row(params![
            node.bucket_start.timestamp_micros(),
            node.bucket_width_secs,
            node.node_label.as_str(),
            node.kind.as_str(),
            node.call_count,
            node.error_count,
            node.sum_duration_ms,
            node.max_p95_duration_ms,
            node.sum_input_tokens,
            node.sum_output_tokens,
            node.sum_cost,
            node.distinct_executions,
            node.tool_call_count,
            node.model_call_count,
            node.is_root,
            node.is_leaf,
            node.schema_version,
        ])?;
    }
    appender.flush()?;
    Ok(())
}

fn select_edges_in_range(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<EdgeAggregate>, DataError> {
    let mut stmt = conn.prepare(
        "SELECT bucket_start_us, bucket_width_secs, source_label, target_label,
                call_count, error_count, sum_duration_ms, max_p95_duration_ms,
                sum_input_tokens, sum_output_tokens, sum_cost, distinct_executions,
                schema_version
         FROM edge_aggregates
         WHERE bucket_start_us >= ? AND bucket_start_us < ?",
    )?;

    let rows = stmt.query_map(
        params![start.timestamp_micros(), end.timestamp_micros()],
        |row| {
            Ok(EdgeAggregate {
                bucket_start: micros_to_datetime(row.get(0)?),
                bucket_width_secs: row.get(1)?,
                source_label: row.get(2)?,
                target_label: row.get(3)?,
                call_count: row.get(4)?,
                error_count: row.get(5)?,
                sum_duration_ms: row.get(6)?,
                max_p95_duration_ms: row.get(7)?,
                sum_input_tokens: row.get(8)?,
                sum_output_tokens: row.get(9)?,
                sum_cost: row.get(10)?,
                distinct_executions: row.get(11)?,
                schema_version: row.get(12)?,
            })
        },
    )?;

    let mut edges = Vec::new();
    for row in rows {
        edges.push(row?);
    }
    Ok(edges)
}

fn select_nodes_in_range(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<NodeAggregate>, DataError> {
    let mut stmt = conn.prepare(
        "SELECT bucket_start_us, bucket_width_secs, node_label, kind,
                call_count, error_count, sum_duration_ms, max_p95_duration_ms,
                sum_input_tokens, sum_output_tokens, sum_cost, distinct_executions,
                tool_call_count, model_call_count, is_root, is_leaf, schema_version
         FROM node_aggregates
         WHERE bucket_start_us >= ? AND bucket_start_us < ?",
    )?;

    let rows = stmt.query_map(
        params![start.timestamp_micros(), end.timestamp_micros()],
        |row| {
            Ok(NodeAggregate {
                bucket_start: micros_to_datetime(row.get(0)?),
                bucket_width_secs: row.get(1)?,
                node_label: row.get(2)?,
                kind: parse_kind(&row.get::<_, String>(3)?),
                call_count: row.get(4)?,
                error_count: row.get(5)?,
                sum_duration_ms: row.get(6)?,
                max_p95_duration_ms: row.get(7)?,
                sum_input_tokens: row.get(8)?,
                sum_output_tokens: row.get(9)?,
                sum_cost: row.get(10)?,
                distinct_executions: row.get(11)?,
                tool_call_count: row.get(12)?,
                model_call_count: row.get(13)?,
                is_root: row.get(14)?,
                is_leaf: row.get(15)?,
                schema_version: row.get(16)?,
            })
        },
    )?;

    let mut nodes = Vec::new();
    for row in rows {
        nodes.push(row?);
    }
    Ok(nodes)
}

fn select_covered_buckets(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<BTreeSet<DateTime<Utc>>, DataError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT bucket_start_us FROM edge_aggregates
         WHERE bucket_start_us >= ? AND bucket_start_us < ?
         UNION
         SELECT DISTINCT bucket_start_us FROM node_aggregates
         WHERE bucket_start_us >= ? AND bucket_start_us < ?",
    )?;

    let start_us = start.timestamp_micros();
    let end_us = end.timestamp_micros();
    let rows = stmt.query_map(params![start_us, end_us, start_us, end_us], |row| {
        row.get::<_, i64>(0)
    })?;

    let mut covered = BTreeSet::new();
    for row in rows {
        covered.insert(micros_to_datetime(row?));
    }
    Ok(covered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::AGGREGATE_SCHEMA_VERSION;
    use chrono::TimeZone;

    fn test_store() -> Arc<DuckdbStore> {
        Arc::new(DuckdbStore::init_in_memory().expect("Failed to init in-memory store"))
    }

    fn bucket(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    fn span(id: &str, exec: &str, label: &str, start: DateTime<Utc>) -> SpanRecord {
        SpanRecord {
            span_id: id.to_string(),
            parent_id: None,
            execution_id: exec.to_string(),
            participant_label: label.to_string(),
            participant_kind: ParticipantKind::Agent,
            start_time: start,
            duration_ms: 120,
            input_tokens: 100,
            output_tokens: 50,
            model_identifier: Some("gpt-4o".to_string()),
            is_error: false,
            status_message: None,
        }
    }

    fn edge(bucket_start: DateTime<Utc>, source: &str, target: &str, calls: i64) -> EdgeAggregate {
        EdgeAggregate {
            bucket_start,
            bucket_width_secs: 3600,
            source_label: source.to_string(),
            target_label: target.to_string(),
            call_count: calls,
            error_count: 1,
            sum_duration_ms: 100 * calls,
            max_p95_duration_ms: 250,
            sum_input_tokens: 1000,
            sum_output_tokens: 400,
            sum_cost: 0.025,
            distinct_executions: 2,
            schema_version: AGGREGATE_SCHEMA_VERSION,
        }
    }

    fn node(bucket_start: DateTime<Utc>, label: &str) -> NodeAggregate {
        NodeAggregate {
            bucket_start,
            bucket_width_secs: 3600,
            node_label: label.to_string(),
            kind: ParticipantKind::Agent,
            call_count: 4,
            error_count: 0,
            sum_duration_ms: 480,
            max_p95_duration_ms: 200,
            sum_input_tokens: 800,
            sum_output_tokens: 300,
            sum_cost: 0.02,
            distinct_executions: 2,
            tool_call_count: 3,
            model_call_count: 1,
            is_root: true,
            is_leaf: false,
            schema_version: AGGREGATE_SCHEMA_VERSION,
        }
    }

    #[tokio::test]
    async fn test_span_roundtrip() {
        let store = test_store();
        let spans = vec![
            span("s1", "e1", "planner", bucket(10)),
            span("s2", "e2", "worker", bucket(12)),
        ];
        store.insert_spans(&spans).await.unwrap();

        let got = store.spans_in_range(bucket(10), bucket(11)).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].span_id, "s1");
        assert_eq!(got[0].participant_kind, ParticipantKind::Agent);
        assert_eq!(got[0].model_identifier.as_deref(), Some("gpt-4o"));
        assert_eq!(got[0].start_time, bucket(10));
    }

    #[tokio::test]
    async fn test_bucket_roundtrip() {
        let store = test_store();
        let edges = vec![edge(bucket(10), "planner", "search", 5)];
        let nodes = vec![node(bucket(10), "planner")];
        store.upsert_buckets(&edges, &nodes).await.unwrap();

        let rows = store.query_range(bucket(10), bucket(11)).await.unwrap();
        assert_eq!(rows.edges, edges);
        assert_eq!(rows.nodes, nodes);
    }

    #[tokio::test]
    async fn test_upsert_replaces_not_appends() {
        let store = test_store();
        store
            .upsert_buckets(&[edge(bucket(10), "a", "b", 5)], &[])
            .await
            .unwrap();
        store
            .upsert_buckets(&[edge(bucket(10), "a", "b", 5)], &[])
            .await
            .unwrap();

        let rows = store.query_range(bucket(10), bucket(11)).await.unwrap();
        assert_eq!(rows.edges.len(), 1);
        assert_eq!(rows.edges[0].call_count, 5);
    }

    #[tokio::test]
    async fn test_schema_conflict_skips_bucket_only() {
        let store = test_store();
        store
            .upsert_buckets(&[edge(bucket(11), "a", "b", 3)], &[])
            .await
            .unwrap();

        let mut conflicting = edge(bucket(11), "a", "b", 9);
        conflicting.schema_version = AGGREGATE_SCHEMA_VERSION + 1;

        let err = store
            .upsert_buckets(&[edge(bucket(10), "a", "b", 5), conflicting], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::Conflict(_)));

        // The non-conflicting bucket committed, the conflicting one rolled back
        let rows = store.query_range(bucket(10), bucket(11)).await.unwrap();
        assert_eq!(rows.edges[0].call_count, 5);
        let rows = store.query_range(bucket(11), bucket(12)).await.unwrap();
        assert_eq!(rows.edges[0].call_count, 3);
    }

    #[tokio::test]
    async fn test_covered_buckets() {
        let store = test_store();
        store
            .upsert_buckets(
                &[edge(bucket(10), "a", "b", 1)],
                &[node(bucket(12), "solo")],
            )
            .await
            .unwrap();

        let covered = store.covered_buckets(bucket(9), bucket(13)).await.unwrap();
        assert_eq!(
            covered.into_iter().collect::<Vec<_>>(),
            vec![bucket(10), bucket(12)]
        );
    }

    #[tokio::test]
    async fn test_query_range_end_exclusive() {
        let store = test_store();
        store
            .upsert_buckets(&[edge(bucket(10), "a", "b", 1)], &[])
            .await
            .unwrap();
        let rows = store.query_range(bucket(9), bucket(10)).await.unwrap();
        assert!(rows.is_empty());
    }
}
