//! Shared API types
//!
//! Error handling and parameter parsing shared across endpoints.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};

use crate::domain::graph::GraphError;
use crate::utils::time::parse_iso_timestamp;

/// Parse a required timestamp parameter (RFC 3339 / ISO 8601 format)
pub fn parse_timestamp_param(name: &str, value: &str) -> Result<DateTime<Utc>, ApiError> {
    parse_iso_timestamp(value).ok_or_else(|| {
        ApiError::bad_request(
            "INVALID_TIMESTAMP",
            format!("Invalid {} format: {}. Use ISO 8601 format.", name, value),
        )
    })
}

/// Standard API error response
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: String, message: String },
    NotFound { code: String, message: String },
    ServiceUnavailable { code: String, message: String },
    Timeout { message: String },
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Map engine errors to API responses.
    ///
    /// Store unavailability and live-traversal timeout map to distinct status
    /// codes so callers can tell "try a smaller range" from "backend down".
    pub fn from_graph(e: GraphError) -> Self {
        match e {
            GraphError::TraversalTimeout { timeout_secs } => Self::Timeout {
                message: format!("Live traversal timed out after {}s", timeout_secs),
            },
            GraphError::StoreUnavailable(source) => {
                tracing::error!(error = %source, "Aggregate store unavailable");
                Self::ServiceUnavailable {
                    code: "AGGREGATION_UNAVAILABLE".to_string(),
                    message: "Aggregate store is unavailable".to_string(),
                }
            }
            GraphError::AggregationConflict(reason) => {
                tracing::error!(reason, "Aggregation conflict");
                Self::Internal {
                    message: "Aggregation conflict".to_string(),
                }
            }
            GraphError::Data(source) => {
                tracing::error!(error = %source, "Data error");
                Self::Internal {
                    message: "Store operation failed".to_string(),
                }
            }
        }
    }

    pub fn from_data(e: crate::data::DataError) -> Self {
        tracing::error!(error = %e, "Data error");
        Self::Internal {
            message: "Store operation failed".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match self {
            Self::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, "bad_request", code, message)
            }
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, "not_found", code, message),
            Self::ServiceUnavailable { code, message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                code,
                message,
            ),
            Self::Timeout { message } => (
                StatusCode::GATEWAY_TIMEOUT,
                "traversal_timeout",
                "TRAVERSAL_TIMEOUT".to_string(),
                message,
            ),
            Self::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "INTERNAL".to_string(),
                message,
            ),
        };
        (
            status,
            Json(serde_json::json!({
                "error": error_type,
                "code": code,
                "message": message
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataError;

    #[test]
    fn test_parse_timestamp_param_valid() {
        let ts = parse_timestamp_param("start", "2024-06-01T10:00:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-06-01T10:00:00+00:00");
    }

    #[test]
    fn test_parse_timestamp_param_invalid() {
        let err = parse_timestamp_param("start", "yesterday").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { .. }));
    }

    #[test]
    fn test_store_unavailable_maps_to_503_with_distinct_code() {
        let err = ApiError::from_graph(GraphError::StoreUnavailable(
            DataError::backend_unavailable("duckdb", "connection refused"),
        ));
        match err {
            ApiError::ServiceUnavailable { code, .. } => {
                assert_eq!(code, "AGGREGATION_UNAVAILABLE");
            }
            other => panic!("Expected ServiceUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_traversal_timeout_maps_to_timeout() {
        let err = ApiError::from_graph(GraphError::TraversalTimeout { timeout_secs: 30 });
        assert!(matches!(err, ApiError::Timeout { .. }));
    }
}
