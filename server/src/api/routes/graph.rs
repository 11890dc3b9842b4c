//! Delegation graph query endpoint

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use super::ApiState;
use crate::api::types::{ApiError, parse_timestamp_param};
use crate::domain::graph::{GraphSnapshot, TimeRange};

/// Upper bound on the queried range to keep bucket merges bounded
const MAX_RANGE_DAYS: i64 = 90;

#[derive(Debug, Deserialize)]
pub struct GraphQuery {
    /// Start of time range (ISO 8601, inclusive)
    pub start: String,
    /// End of time range (ISO 8601, exclusive)
    pub end: String,
}

/// Get the aggregated delegation graph for a time range.
///
/// Ranges below the live threshold are computed exactly from raw spans;
/// larger ranges merge pre-aggregated buckets.
#[utoipa::path(
    get,
    path = "/api/v1/graph",
    tag = "graph",
    params(
        ("start" = String, Query, description = "Start of time range (ISO 8601, required)"),
        ("end" = String, Query, description = "End of time range (ISO 8601, required)")
    ),
    responses(
        (status = 200, description = "Aggregated delegation graph", body = GraphSnapshot),
        (status = 400, description = "Invalid time range"),
        (status = 503, description = "Aggregate store unavailable"),
        (status = 504, description = "Live traversal timed out")
    )
)]
pub async fn get_graph(
    State(state): State<ApiState>,
    Query(query): Query<GraphQuery>,
) -> Result<Json<GraphSnapshot>, ApiError> {
    let start = parse_timestamp_param("start", &query.start)?;
    let end = parse_timestamp_param("end", &query.end)?;

    if start >= end {
        return Err(ApiError::bad_request(
            "INVALID_TIME_RANGE",
            "start must be strictly before end",
        ));
    }

    if (end - start).num_days() > MAX_RANGE_DAYS {
        return Err(ApiError::bad_request(
            "RANGE_TOO_LARGE",
            format!("Time range cannot exceed {} days", MAX_RANGE_DAYS),
        ));
    }

    let snapshot = state
        .query
        .query(TimeRange { start, end })
        .await
        .map_err(ApiError::from_graph)?;

    Ok(Json(snapshot))
}
