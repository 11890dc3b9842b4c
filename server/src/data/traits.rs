//! Repository trait for multi-backend store support
//!
//! The [`GraphRepository`] trait is the storage boundary of the aggregation
//! engine: normalized spans go in, bucketed aggregate rows go in and out.
//! Implemented by the in-memory backend and the DuckDB backend.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::DataError;
use super::types::{BucketRows, EdgeAggregate, NodeAggregate, SpanRecord};

/// Backend-agnostic store operations for spans and bucketed aggregates.
///
/// Upsert semantics: a bucket's rows are replaced wholesale per
/// `(bucket_start, source, target)` / `(bucket_start, node)` key, atomically
/// per bucket, never appended to. This replace contract is what makes
/// repeated aggregation runs over overlapping raw data idempotent.
#[async_trait]
pub trait GraphRepository: Send + Sync {
    /// Insert normalized spans handed over by the telemetry collaborator.
    async fn insert_spans(&self, spans: &[SpanRecord]) -> Result<(), DataError>;

    /// Fetch raw spans whose `start_time` falls in `[start, end)`.
    ///
    /// Spans are returned in no particular order; callers group by
    /// `execution_id` themselves.
    async fn spans_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SpanRecord>, DataError>;

    /// Replace aggregate rows per bucket key.
    ///
    /// All rows belonging to one `bucket_start` are written in a single atomic
    /// unit: existing rows for that bucket are removed first, so concurrent
    /// readers never observe a half-updated bucket. Returns
    /// [`DataError::Conflict`] for a bucket whose existing rows carry a
    /// different schema version; buckets processed before the conflict remain
    /// written.
    async fn upsert_buckets(
        &self,
        edges: &[EdgeAggregate],
        nodes: &[NodeAggregate],
    ) -> Result<(), DataError>;

    /// Return all bucket rows whose `bucket_start` falls in `[start, end)`,
    /// unmerged. Cross-bucket merging is the query router's job.
    async fn query_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BucketRows, DataError>;

    /// Bucket keys in `[start, end)` that already have persisted aggregate
    /// rows. Supports the scheduled job's `already_covered` input for
    /// dedup-safe re-runs.
    async fn covered_buckets(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeSet<DateTime<Utc>>, DataError>;
}
