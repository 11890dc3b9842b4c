//! Delegation-graph engine
//!
//! The pipeline from raw spans to queryable topology:
//!
//! - `collapse` - derive delegation observations from one execution's spans
//! - `aggregate` - fold observations into fixed-width bucket rows
//! - `snapshot` - merge bucket rows into the externally visible snapshot
//! - `query` - route a time-range query to the live or pre-aggregated path
//! - `job` - scheduled pre-aggregation over recent windows

pub mod aggregate;
pub mod collapse;
pub mod job;
pub mod query;
pub mod snapshot;

pub use aggregate::{BucketBatch, aggregate};
pub use collapse::{CollapseOutput, DEFAULT_MAX_HOPS, DelegationObservation, NodeObservation, collapse};
pub use job::{AggregationJob, JobConfig};
pub use query::{QueryRouter, RouterConfig};
pub use snapshot::{EdgeView, GraphSnapshot, NodeView, TimeRange};

use thiserror::Error;

use crate::data::DataError;

/// Errors surfaced by the graph engine.
///
/// Store unavailability is distinct from a live-traversal timeout so callers
/// can tell "try a smaller range" apart from "backend down". Malformed spans
/// are not represented here: they are recovered locally during collapse
/// (skip-and-count), never escalated.
#[derive(Error, Debug)]
pub enum GraphError {
    /// The live path exceeded its wall-clock budget; no partial result
    #[error("Live traversal timed out after {timeout_secs}s")]
    TraversalTimeout { timeout_secs: u64 },

    /// The pre-aggregated store could not serve the query
    #[error("Aggregate store unavailable: {0}")]
    StoreUnavailable(#[source] DataError),

    /// A bucket upsert found rows with a different schema version
    #[error("Aggregation conflict: {0}")]
    AggregationConflict(String),

    /// Raw-span access failed outside the store-aggregation path
    #[error(transparent)]
    Data(DataError),
}
