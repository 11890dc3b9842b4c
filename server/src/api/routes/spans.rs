//! Normalized span intake endpoint
//!
//! The upstream telemetry collaborator hands spans over this boundary already
//! deduplicated and normalized; no reclassification happens here.

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use utoipa::ToSchema;

use super::ApiState;
use crate::api::types::ApiError;
use crate::core::constants::MAX_SPAN_BATCH;
use crate::data::types::SpanRecord;

#[derive(Serialize, ToSchema)]
pub struct IngestResponse {
    pub accepted: usize,
}

/// Ingest a batch of normalized span records
#[utoipa::path(
    post,
    path = "/api/v1/spans",
    tag = "spans",
    request_body = Vec<SpanRecord>,
    responses(
        (status = 200, description = "Spans accepted", body = IngestResponse),
        (status = 400, description = "Batch too large or empty")
    )
)]
pub async fn ingest_spans(
    State(state): State<ApiState>,
    Json(spans): Json<Vec<SpanRecord>>,
) -> Result<Json<IngestResponse>, ApiError> {
    if spans.is_empty() {
        return Err(ApiError::bad_request("EMPTY_BATCH", "No spans in batch"));
    }
    if spans.len() > MAX_SPAN_BATCH {
        return Err(ApiError::bad_request(
            "BATCH_TOO_LARGE",
            format!("Batch exceeds {} spans", MAX_SPAN_BATCH),
        ));
    }

    let accepted = spans.len();
    state
        .repo
        .insert_spans(&spans)
        .await
        .map_err(ApiError::from_data)?;

    tracing::debug!(spans = accepted, "Ingested span batch");
    Ok(Json(IngestResponse { accepted }))
}
