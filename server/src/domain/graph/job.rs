//! Scheduled pre-aggregation job
//!
//! Periodically folds recent raw spans into bucket rows so large historical
//! ranges can be answered without re-scanning raw data. The job shares no
//! mutable state with the query path; the store's atomic replace-per-bucket
//! upsert is the only point of contact.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::GraphError;
use super::aggregate::{BucketBatch, aggregate};
use super::collapse::{CollapseOutput, collapse};
use crate::data::DataError;
use crate::data::traits::GraphRepository;
use crate::data::types::{EdgeAggregate, NodeAggregate, SpanRecord};
use crate::domain::pricing::CostModel;
use crate::utils::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, retry_with_backoff_async};
use crate::utils::time::floor_to_bucket;

/// Scheduling parameters for the aggregation job
#[derive(Debug, Clone, Copy)]
pub struct JobConfig {
    /// Width of one pre-aggregation bucket
    pub bucket_width: Duration,
    /// Cadence of scheduled runs
    pub interval: Duration,
    /// How many complete buckets each run scans backwards from now
    pub lookback_buckets: u32,
    /// Budget for one window; an over-budget window is logged and skipped
    pub window_timeout: Duration,
    /// Hop budget for the collapse traversal
    pub max_hops: usize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            bucket_width: Duration::from_secs(3600),
            interval: Duration::from_secs(3600),
            lookback_buckets: 3,
            window_timeout: Duration::from_secs(300),
            max_hops: super::collapse::DEFAULT_MAX_HOPS,
        }
    }
}

/// Outcome of one aggregation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub buckets_written: usize,
    pub buckets_conflicted: usize,
    pub edge_rows: usize,
    pub node_rows: usize,
    pub malformed_spans: u32,
}

/// Periodic batch job deriving and persisting bucket aggregates
pub struct AggregationJob {
    repo: Box<dyn GraphRepository>,
    costs: Arc<CostModel>,
    config: JobConfig,
}

impl AggregationJob {
    pub fn new(repo: Box<dyn GraphRepository>, costs: Arc<CostModel>, config: JobConfig) -> Self {
        Self {
            repo,
            costs,
            config,
        }
    }

    /// Start the scheduled loop. Each tick processes the lookback window
    /// ending at the last complete bucket, under the per-window timeout.
    pub fn start(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let job = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(job.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await; // Skip immediate first tick

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("AggregationJob shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match tokio::time::timeout(job.config.window_timeout, job.run_once()).await {
                            Ok(Ok(stats)) => {
                                tracing::debug!(
                                    buckets = stats.buckets_written,
                                    conflicts = stats.buckets_conflicted,
                                    edges = stats.edge_rows,
                                    nodes = stats.node_rows,
                                    "Aggregation run complete"
                                );
                            }
                            Ok(Err(e)) => {
                                tracing::error!(error = %e, "Aggregation run failed");
                            }
                            Err(_) => {
                                // Skip this window rather than stall the next one
                                tracing::warn!(
                                    timeout_secs = job.config.window_timeout.as_secs(),
                                    "Aggregation window exceeded budget, skipping"
                                );
                            }
                        }
                    }
                }
            }
        })
    }

    /// Run one scheduled pass over the lookback window.
    ///
    /// The most recent complete bucket is always re-aggregated (late-arriving
    /// spans land there); older buckets already persisted are passed as
    /// `already_covered` so a retried or overlapping run never double counts.
    pub async fn run_once(&self) -> Result<RunStats, GraphError> {
        let width = self.config.bucket_width;
        let window_end = floor_to_bucket(Utc::now(), width);
        let lookback = width.as_secs().max(1) * u64::from(self.config.lookback_buckets.max(1));
        let window_start = window_end - chrono::Duration::seconds(lookback as i64);

        let newest_complete = window_end - chrono::Duration::seconds(width.as_secs().max(1) as i64);
        let already_covered: BTreeSet<DateTime<Utc>> = self
            .repo
            .covered_buckets(window_start, window_end)
            .await
            .map_err(GraphError::Data)?
            .into_iter()
            .filter(|bucket| *bucket != newest_complete)
            .collect();

        self.run_window(window_start, window_end, &already_covered)
            .await
    }

    /// Aggregate one explicit window: the external-scheduler entry point.
    ///
    /// Pure with respect to job state: the result depends only on the raw
    /// spans in the window and the `already_covered` set. Bucket conflicts are
    /// fatal for the affected bucket only; the run continues with the rest.
    pub async fn run_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        already_covered: &BTreeSet<DateTime<Utc>>,
    ) -> Result<RunStats, GraphError> {
        let spans = self
            .repo
            .spans_in_range(start, end)
            .await
            .map_err(GraphError::Data)?;

        if spans.is_empty() {
            tracing::debug!(%start, %end, "No spans in aggregation window");
            return Ok(RunStats::default());
        }

        let batch = self.fold_window(spans, already_covered.clone()).await?;
        if batch.is_empty() {
            return Ok(RunStats::default());
        }

        let mut stats = RunStats {
            edge_rows: batch.edges.len(),
            node_rows: batch.nodes.len(),
            ..RunStats::default()
        };

        // One upsert per bucket: a conflicted bucket must not take down the rest
        for bucket in batch.bucket_starts() {
            let edges: Vec<EdgeAggregate> = batch
                .edges
                .iter()
                .filter(|e| e.bucket_start == bucket)
                .cloned()
                .collect();
            let nodes: Vec<NodeAggregate> = batch
                .nodes
                .iter()
                .filter(|n| n.bucket_start == bucket)
                .cloned()
                .collect();

            match self.upsert_with_retry(&edges, &nodes).await {
                Ok(()) => stats.buckets_written += 1,
                Err(DataError::Conflict(reason)) => {
                    tracing::error!(bucket = %bucket, reason, "Bucket aggregation conflict, skipping bucket");
                    stats.buckets_conflicted += 1;
                }
                Err(e) => return Err(GraphError::Data(e)),
            }
        }

        Ok(stats)
    }

    async fn fold_window(
        &self,
        spans: Vec<SpanRecord>,
        already_covered: BTreeSet<DateTime<Utc>>,
    ) -> Result<BucketBatch, GraphError> {
        let max_hops = self.config.max_hops;
        let width = self.config.bucket_width;
        let costs = Arc::clone(&self.costs);

        // CPU-bound fold runs off the async runtime
        let (batch, malformed) = tokio::task::spawn_blocking(move || {
            let mut by_execution: rustc_hash::FxHashMap<String, Vec<SpanRecord>> =
                rustc_hash::FxHashMap::default();
            for span in spans {
                by_execution
                    .entry(span.execution_id.clone())
                    .or_default()
                    .push(span);
            }

            let mut collapsed = CollapseOutput::default();
            for execution in by_execution.values() {
                collapsed.merge(collapse(execution, max_hops, &costs));
            }

            let malformed = collapsed.malformed_spans;
            let batch = aggregate(
                &collapsed.observations,
                &collapsed.nodes,
                width,
                &already_covered,
            );
            (batch, malformed)
        })
        .await
        .map_err(|e| GraphError::Data(DataError::Io(std::io::Error::other(e))))?;

        if malformed > 0 {
            tracing::warn!(malformed, "Skipped malformed spans during aggregation");
        }
        Ok(batch)
    }

    async fn upsert_with_retry(
        &self,
        edges: &[EdgeAggregate],
        nodes: &[NodeAggregate],
    ) -> Result<(), DataError> {
        let result = retry_with_backoff_async(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY_MS, || {
            self.repo.upsert_buckets(edges, nodes)
        })
        .await;

        match result {
            Ok(attempts) => {
                if attempts > 1 {
                    tracing::debug!(attempts, "Bucket upsert succeeded after retry");
                }
                Ok(())
            }
            Err((e, attempts)) => {
                tracing::warn!(error = %e, attempts, "Bucket upsert failed after retries");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::data::memory::MemoryStore;
    use crate::data::types::ParticipantKind;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, min, 0).unwrap()
    }

    fn span(
        id: &str,
        parent: Option<&str>,
        exec: &str,
        label: &str,
        kind: ParticipantKind,
        start: DateTime<Utc>,
    ) -> SpanRecord {
        SpanRecord {
            span_id: id.to_string(),
            parent_id: parent.map(str::to_string),
            execution_id: exec.to_string(),
            participant_label: label.to_string(),
            participant_kind: kind,
            start_time: start,
            duration_ms: 100,
            ..Default::default()
        }
    }

    fn job(store: &Arc<MemoryStore>) -> AggregationJob {
        AggregationJob::new(
            Box::new(Arc::clone(store)),
            Arc::new(CostModel::default()),
            JobConfig::default(),
        )
    }

    async fn seed(store: &Arc<MemoryStore>) {
        let spans = vec![
            span("a", None, "e1", "agent", ParticipantKind::Agent, at(10, 5)),
            span("b", Some("a"), "e1", "search", ParticipantKind::Tool, at(10, 6)),
        ];
        store.insert_spans(&spans).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_window_persists_bucket_rows() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;

        let stats = job(&store)
            .run_window(at(10, 0), at(11, 0), &BTreeSet::new())
            .await
            .unwrap();

        assert_eq!(stats.buckets_written, 1);
        assert_eq!(stats.edge_rows, 1);
        assert_eq!(stats.node_rows, 2);

        let rows = store.query_range(at(10, 0), at(11, 0)).await.unwrap();
        assert_eq!(rows.edges.len(), 1);
        assert_eq!(rows.edges[0].call_count, 1);
    }

    #[tokio::test]
    async fn test_rerun_with_already_covered_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        let j = job(&store);

        j.run_window(at(10, 0), at(11, 0), &BTreeSet::new())
            .await
            .unwrap();
        let before = store.query_range(at(10, 0), at(11, 0)).await.unwrap();

        // Second run over identical raw data, told the bucket is covered
        let covered = store.covered_buckets(at(10, 0), at(11, 0)).await.unwrap();
        let stats = j.run_window(at(10, 0), at(11, 0), &covered).await.unwrap();
        assert_eq!(stats.buckets_written, 0);

        let after = store.query_range(at(10, 0), at(11, 0)).await.unwrap();
        assert_eq!(
            before.edges[0].call_count, after.edges[0].call_count,
            "stored call_count must be unchanged"
        );
    }

    #[tokio::test]
    async fn test_rerun_without_covered_set_replaces_not_doubles() {
        let store = Arc::new(MemoryStore::new());
        seed(&store).await;
        let j = job(&store);

        j.run_window(at(10, 0), at(11, 0), &BTreeSet::new())
            .await
            .unwrap();
        j.run_window(at(10, 0), at(11, 0), &BTreeSet::new())
            .await
            .unwrap();

        let rows = store.query_range(at(10, 0), at(11, 0)).await.unwrap();
        assert_eq!(rows.edges[0].call_count, 1, "replace semantics, no doubling");
    }

    #[tokio::test]
    async fn test_empty_window_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let stats = job(&store)
            .run_window(at(0, 0), at(1, 0), &BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(stats, RunStats::default());
    }

    #[tokio::test]
    async fn test_window_spanning_multiple_buckets() {
        let store = Arc::new(MemoryStore::new());
        let spans = vec![
            span("a1", None, "e1", "agent", ParticipantKind::Agent, at(10, 5)),
            span("b1", Some("a1"), "e1", "search", ParticipantKind::Tool, at(10, 6)),
            span("a2", None, "e2", "agent", ParticipantKind::Agent, at(11, 5)),
            span("b2", Some("a2"), "e2", "search", ParticipantKind::Tool, at(11, 6)),
        ];
        store.insert_spans(&spans).await.unwrap();

        let stats = job(&store)
            .run_window(at(10, 0), at(12, 0), &BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(stats.buckets_written, 2);

        let covered = store.covered_buckets(at(10, 0), at(12, 0)).await.unwrap();
        assert_eq!(covered.len(), 2);
    }
}
