//! API server initialization

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::openapi;
use super::routes::{self, ApiState};
use crate::app::CoreApp;
use crate::core::constants::SPANS_BODY_LIMIT;

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Serve until shutdown is triggered. Returns CoreApp for graceful close.
    pub async fn start(self) -> Result<CoreApp> {
        let app = self.app;
        let shutdown = app.shutdown.clone();

        let addr = SocketAddr::new(app.config.server.host.parse()?, app.config.server.port);

        let state = ApiState {
            query: Arc::clone(&app.query),
            repo: Arc::clone(&app.repo),
            job: Arc::clone(&app.job),
        };

        let router = Router::new()
            .route("/api/v1/health", get(routes::health::health))
            .route("/api/v1/graph", get(routes::graph::get_graph))
            .route("/api/v1/spans", post(routes::spans::ingest_spans))
            .route("/api/v1/aggregate/run", post(routes::aggregate::run_aggregation))
            .route("/api/v1/openapi.json", get(openapi::openapi_json))
            .with_state(state)
            .layer(DefaultBodyLimit::max(SPANS_BODY_LIMIT))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "API server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        Ok(app)
    }
}
