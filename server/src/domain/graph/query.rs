//! Query routing between live recomputation and the pre-aggregated store
//!
//! Small/recent ranges are answered exactly by collapsing raw spans on demand;
//! large ranges are answered from bucket rows. The two paths normalize into
//! the same [`GraphSnapshot`] shape, and the store path never falls back to
//! the live path implicitly: a cheap query must not silently turn into a
//! full-history scan.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;

use super::GraphError;
use super::aggregate::{BucketBatch, aggregate};
use super::collapse::{CollapseOutput, DEFAULT_MAX_HOPS, collapse};
use super::snapshot::{GraphSnapshot, TimeRange, from_bucket_rows};
use crate::data::traits::GraphRepository;
use crate::data::types::{BucketRows, SpanRecord};
use crate::domain::pricing::CostModel;

/// Executions per blocking worker on the live path
const LIVE_COLLAPSE_CHUNK: usize = 64;

/// Routing parameters
#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    /// Ranges shorter than this are recomputed live from raw spans
    pub live_threshold: Duration,
    /// Hard wall-clock budget for the live path (fetch + traversal)
    pub live_timeout: Duration,
    /// Hop budget for the collapse traversal
    pub max_hops: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            live_threshold: Duration::from_secs(3600),
            live_timeout: Duration::from_secs(30),
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

/// Routes time-range queries to the live or pre-aggregated path
pub struct QueryRouter {
    repo: Box<dyn GraphRepository>,
    costs: Arc<CostModel>,
    config: RouterConfig,
}

impl QueryRouter {
    pub fn new(repo: Box<dyn GraphRepository>, costs: Arc<CostModel>, config: RouterConfig) -> Self {
        Self {
            repo,
            costs,
            config,
        }
    }

    /// Answer a time-range query.
    ///
    /// Ranges shorter than `live_threshold` run PathCollapser plus a single
    /// whole-range aggregation pass over raw spans, guaranteeing freshness and
    /// never touching the aggregate rows. Everything else merges stored bucket
    /// rows; if the store cannot serve, the error surfaces as
    /// [`GraphError::StoreUnavailable`] rather than falling back to a
    /// potentially unbounded live scan.
    pub async fn query(&self, range: TimeRange) -> Result<GraphSnapshot, GraphError> {
        let range_duration = range
            .duration()
            .to_std()
            .unwrap_or(Duration::ZERO);

        if range_duration < self.config.live_threshold {
            self.query_live(range, range_duration).await
        } else {
            self.query_store(range).await
        }
    }

    async fn query_live(
        &self,
        range: TimeRange,
        range_duration: Duration,
    ) -> Result<GraphSnapshot, GraphError> {
        let timeout_secs = self.config.live_timeout.as_secs();
        let batch = tokio::time::timeout(self.config.live_timeout, async {
            let spans = self
                .repo
                .spans_in_range(range.start, range.end)
                .await
                .map_err(GraphError::Data)?;
            self.collapse_and_fold(spans, range_duration).await
        })
        .await
        .map_err(|_| {
            tracing::warn!(timeout_secs, "Live query exceeded wall-clock budget");
            GraphError::TraversalTimeout { timeout_secs }
        })??;

        Ok(from_bucket_rows(
            BucketRows {
                edges: batch.edges,
                nodes: batch.nodes,
            },
            range,
        ))
    }

    /// Collapse per execution, fanned out across blocking workers, then fold
    /// everything into one whole-range bucket.
    async fn collapse_and_fold(
        &self,
        spans: Vec<SpanRecord>,
        range_duration: Duration,
    ) -> Result<BucketBatch, GraphError> {
        let mut by_execution: FxHashMap<String, Vec<SpanRecord>> = FxHashMap::default();
        for span in spans {
            by_execution
                .entry(span.execution_id.clone())
                .or_default()
                .push(span);
        }

        let executions: Vec<Vec<SpanRecord>> = by_execution.into_values().collect();
        let max_hops = self.config.max_hops;

        let mut tasks = Vec::new();
        for chunk in executions.chunks(LIVE_COLLAPSE_CHUNK) {
            let chunk: Vec<Vec<SpanRecord>> = chunk.to_vec();
            let costs = Arc::clone(&self.costs);
            tasks.push(tokio::task::spawn_blocking(move || {
                let mut out = CollapseOutput::default();
                for execution in &chunk {
                    out.merge(collapse(execution, max_hops, &costs));
                }
                out
            }));
        }

        let mut collapsed = CollapseOutput::default();
        for task in tasks {
            let out = task
                .await
                .map_err(|e| GraphError::Data(crate::data::DataError::Io(std::io::Error::other(e))))?;
            collapsed.merge(out);
        }

        if collapsed.malformed_spans > 0 {
            tracing::warn!(
                malformed = collapsed.malformed_spans,
                "Skipped malformed spans during live traversal"
            );
        }

        // A single bucket spanning the whole range keeps the live result exact
        Ok(aggregate(
            &collapsed.observations,
            &collapsed.nodes,
            range_duration.max(Duration::from_secs(1)),
            &BTreeSet::new(),
        ))
    }

    async fn query_store(&self, range: TimeRange) -> Result<GraphSnapshot, GraphError> {
        let rows = self
            .repo
            .query_range(range.start, range.end)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Aggregate store query failed");
                GraphError::StoreUnavailable(e)
            })?;
        Ok(from_bucket_rows(rows, range))
    }
}
