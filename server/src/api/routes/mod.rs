//! API route handlers

pub mod aggregate;
pub mod graph;
pub mod health;
pub mod spans;

use std::sync::Arc;

use crate::data::traits::GraphRepository;
use crate::domain::graph::{AggregationJob, QueryRouter};

/// Shared state for the API handlers
#[derive(Clone)]
pub struct ApiState {
    pub query: Arc<QueryRouter>,
    pub repo: Arc<dyn GraphRepository>,
    pub job: Arc<AggregationJob>,
}
