//! Aggregation trigger endpoint
//!
//! The external-scheduler hook: each call runs one pass over the lookback
//! window, with the same idempotency contract as the built-in interval job.

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use utoipa::ToSchema;

use super::ApiState;
use crate::api::types::ApiError;

#[derive(Serialize, ToSchema)]
pub struct AggregateRunResponse {
    pub buckets_written: usize,
    pub buckets_conflicted: usize,
    pub edge_rows: usize,
    pub node_rows: usize,
}

/// Run one aggregation pass over the lookback window
#[utoipa::path(
    post,
    path = "/api/v1/aggregate/run",
    tag = "aggregate",
    responses(
        (status = 200, description = "Aggregation pass finished", body = AggregateRunResponse),
        (status = 503, description = "Store unavailable")
    )
)]
pub async fn run_aggregation(
    State(state): State<ApiState>,
) -> Result<Json<AggregateRunResponse>, ApiError> {
    let stats = state.job.run_once().await.map_err(ApiError::from_graph)?;

    Ok(Json(AggregateRunResponse {
        buckets_written: stats.buckets_written,
        buckets_conflicted: stats.buckets_conflicted,
        edge_rows: stats.edge_rows,
        node_rows: stats.node_rows,
    }))
}
