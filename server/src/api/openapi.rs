//! OpenAPI specification endpoint

use axum::response::{IntoResponse, Json};
use utoipa::OpenApi;

use crate::api::routes::{aggregate, graph, health, spans};
use crate::data::types::{ParticipantKind, SpanRecord};
use crate::domain::graph::{EdgeView, GraphSnapshot, NodeView, TimeRange};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AgentGraph API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Delegation-graph telemetry aggregation"
    ),
    tags(
        (name = "health", description = "Health check endpoint"),
        (name = "graph", description = "Delegation graph queries"),
        (name = "spans", description = "Normalized span intake"),
        (name = "aggregate", description = "Aggregation job trigger")
    ),
    paths(
        health::health,
        graph::get_graph,
        spans::ingest_spans,
        aggregate::run_aggregation,
    ),
    components(schemas(
        health::HealthResponse,
        spans::IngestResponse,
        aggregate::AggregateRunResponse,
        SpanRecord,
        ParticipantKind,
        GraphSnapshot,
        TimeRange,
        EdgeView,
        NodeView,
    ))
)]
struct ApiDoc;

/// Serve the generated OpenAPI document
pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
