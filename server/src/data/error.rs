//! Unified error type for the data layer
//!
//! Wraps backend-specific errors while preserving context about which backend
//! generated the error.

use thiserror::Error;

/// Unified error type for store operations
#[derive(Error, Debug)]
pub enum DataError {
    /// DuckDB database error
    #[error("DuckDB error: {0}")]
    Duckdb(#[from] duckdb::Error),

    /// Migration failed
    #[error("Migration {version} ({name}) failed on {backend}: {error}")]
    MigrationFailed {
        backend: &'static str,
        version: i32,
        name: String,
        error: String,
    },

    /// Query timeout
    #[error("Query timeout after {timeout_secs}s on {backend}")]
    Timeout {
        backend: &'static str,
        timeout_secs: u64,
    },

    /// Backend not available
    #[error("Backend {backend} is not available: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// Aggregate bucket conflict (existing rows carry a different schema version)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DataError {
    /// Create a timeout error
    pub fn timeout(backend: &'static str, timeout_secs: u64) -> Self {
        Self::Timeout {
            backend,
            timeout_secs,
        }
    }

    /// Create a backend unavailable error
    pub fn backend_unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Create a migration failed error
    pub fn migration_failed(backend: &'static str, version: i32, name: &str, error: &str) -> Self {
        Self::MigrationFailed {
            backend,
            version,
            name: name.to_string(),
            error: error.to_string(),
        }
    }

    /// Check if this is a connection-related error that might be transient
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::BackendUnavailable { .. })
    }

    /// Get the backend name that generated this error
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Duckdb(_) => "duckdb",
            Self::MigrationFailed { backend, .. } => backend,
            Self::Timeout { backend, .. } => backend,
            Self::BackendUnavailable { backend, .. } => backend,
            Self::Conflict(_) | Self::Io(_) => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error_display() {
        let err = DataError::timeout("duckdb", 30);
        assert_eq!(err.to_string(), "Query timeout after 30s on duckdb");
    }

    #[test]
    fn test_backend_unavailable_error_display() {
        let err = DataError::backend_unavailable("duckdb", "connection closed");
        assert_eq!(
            err.to_string(),
            "Backend duckdb is not available: connection closed"
        );
    }

    #[test]
    fn test_migration_failed_error_display() {
        let err = DataError::migration_failed("duckdb", 2, "add_aggregates", "syntax error");
        assert_eq!(
            err.to_string(),
            "Migration 2 (add_aggregates) failed on duckdb: syntax error"
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(DataError::timeout("duckdb", 30).is_transient());
        assert!(DataError::backend_unavailable("duckdb", "closed").is_transient());
        assert!(!DataError::Conflict("schema mismatch".into()).is_transient());
    }

    #[test]
    fn test_backend_method() {
        assert_eq!(DataError::timeout("duckdb", 30).backend(), "duckdb");
        assert_eq!(DataError::Conflict("x".into()).backend(), "unknown");
    }
}
