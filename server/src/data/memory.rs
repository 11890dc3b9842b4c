//! In-memory store backend
//!
//! Default backend for development and tests: spans in a read-write locked
//! vector, aggregate rows in per-bucket maps. The per-bucket map replacement
//! gives the same atomic replace-per-bucket contract as the DuckDB backend's
//! transactions, without any I/O.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use super::error::DataError;
use super::traits::GraphRepository;
use super::types::{BucketRows, EdgeAggregate, NodeAggregate, SpanRecord};

type EdgeKey = (String, String);

/// In-process store for spans and bucketed aggregates
#[derive(Default)]
pub struct MemoryStore {
    spans: RwLock<Vec<SpanRecord>>,
    edges: DashMap<DateTime<Utc>, HashMap<EdgeKey, EdgeAggregate>>,
    nodes: DashMap<DateTime<Utc>, HashMap<String, NodeAggregate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored span count (test and diagnostics utility)
    pub fn span_count(&self) -> usize {
        self.spans.read().len()
    }

    fn check_bucket_conflict(
        &self,
        bucket: DateTime<Utc>,
        incoming_version: i32,
    ) -> Result<(), DataError> {
        let existing_version = self
            .edges
            .get(&bucket)
            .and_then(|m| m.values().next().map(|e| e.schema_version))
            .or_else(|| {
                self.nodes
                    .get(&bucket)
                    .and_then(|m| m.values().next().map(|n| n.schema_version))
            });

        match existing_version {
            Some(v) if v != incoming_version => Err(DataError::Conflict(format!(
                "bucket {} holds schema v{}, incoming rows are v{}",
                bucket.to_rfc3339(),
                v,
                incoming_version
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl GraphRepository for Arc<MemoryStore> {
    async fn insert_spans(&self, spans: &[SpanRecord]) -> Result<(), DataError> {
        if spans.is_empty() {
            return Ok(());
        }
        self.spans.write().extend_from_slice(spans);
        Ok(())
    }

    async fn spans_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SpanRecord>, DataError> {
        let spans = self.spans.read();
        Ok(spans
            .iter()
            .filter(|s| s.start_time >= start && s.start_time < end)
            .cloned()
            .collect())
    }

    async fn upsert_buckets(
        &self,
        edges: &[EdgeAggregate],
        nodes: &[NodeAggregate],
    ) -> Result<(), DataError> {
        let mut buckets: BTreeSet<(DateTime<Utc>, i32)> = BTreeSet::new();
        buckets.extend(edges.iter().map(|e| (e.bucket_start, e.schema_version)));
        buckets.extend(nodes.iter().map(|n| (n.bucket_start, n.schema_version)));

        for (bucket, version) in buckets {
            self.check_bucket_conflict(bucket, version)?;

            let edge_rows: HashMap<EdgeKey, EdgeAggregate> = edges
                .iter()
                .filter(|e| e.bucket_start == bucket)
                .map(|e| ((e.source_label.clone(), e.target_label.clone()), e.clone()))
                .collect();
            let node_rows: HashMap<String, NodeAggregate> = nodes
                .iter()
                .filter(|n| n.bucket_start == bucket)
                .map(|n| (n.node_label.clone(), n.clone()))
                .collect();

            // Whole-bucket map swap keeps the replace atomic per bucket key
            self.edges.insert(bucket, edge_rows);
            self.nodes.insert(bucket, node_rows);
        }
        Ok(())
    }

    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BucketRows, DataError> {
        let mut rows = BucketRows::default();
        for entry in self.edges.iter() {
            if *entry.key() >= start && *entry.key() < end {
                rows.edges.extend(entry.value().values().cloned());
            }
        }
        for entry in self.nodes.iter() {
            if *entry.key() >= start && *entry.key() < end {
                rows.nodes.extend(entry.value().values().cloned());
            }
        }
        Ok(rows)
    }

    async fn covered_buckets(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, DataError> {
        let mut covered = BTreeSet::new();
        for entry in self.edges.iter() {
            if *entry.key() >= start && *entry.key() < end && !entry.value().is_empty() {
                covered.insert(*entry.key());
            }
        }
        for entry in self.nodes.iter() {
            if *entry.key() >= start && *entry.key() < end && !entry.value().is_empty() {
                covered.insert(*entry.key());
            }
        }
        Ok(covered)
    }
}
