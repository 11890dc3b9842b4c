//! Domain logic
//!
//! - `graph` - delegation-graph derivation, aggregation and query routing
//! - `pricing` - cost model over a pluggable pricing table

pub mod graph;
pub mod pricing;

pub use graph::{AggregationJob, GraphError, GraphSnapshot, QueryRouter};
pub use pricing::CostModel;
