//! DuckDB store backend
//!
//! Embedded columnar warehouse for spans and bucketed aggregates. Uses a
//! single shared connection protected by a mutex; blocking queries run on the
//! blocking pool under a hard timeout.

mod migrations;
mod repository;
pub mod schema;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use duckdb::Connection;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{DUCKDB_CHECKPOINT_INTERVAL_SECS, DUCKDB_QUERY_TIMEOUT_SECS};
use crate::data::error::DataError;

/// DuckDB store service
///
/// Handles database initialization, checkpointing and graceful close.
pub struct DuckdbStore {
    conn: Mutex<Option<Connection>>,
}

impl Drop for DuckdbStore {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!("DuckDB connection close failed during drop: {}", e);
            }
        }
    }
}

impl DuckdbStore {
    /// Initialize the store with a single connection at the given path
    pub async fn init(db_path: &Path) -> Result<Self, DataError> {
        let path = db_path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            conn.execute_batch(
                "SET autoinstall_known_extensions = false;
                 SET autoload_known_extensions = false;
                 PRAGMA enable_checkpoint_on_shutdown;",
            )?;
            Ok::<_, duckdb::Error>(conn)
        })
        .await
        .map_err(|e| DataError::Io(std::io::Error::other(e)))??;

        migrations::run_migrations(&conn)?;

        tracing::debug!(path = %db_path.display(), "DuckdbStore initialized");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Open an in-memory database (test utility)
    #[cfg(test)]
    pub fn init_in_memory() -> Result<Self, DataError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Get exclusive access to the connection.
    ///
    /// Returns [`DataError::BackendUnavailable`] once the connection has been
    /// closed, so callers surface "backend down" instead of panicking.
    fn try_conn(&self) -> Result<parking_lot::MappedMutexGuard<'_, Connection>, DataError> {
        MutexGuard::try_map(self.conn.lock(), |opt| opt.as_mut())
            .map_err(|_| DataError::backend_unavailable("duckdb", "connection closed"))
    }

    /// Run a blocking DuckDB operation on the blocking pool with a timeout
    async fn run_blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T, DataError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, DataError> + Send + 'static,
    {
        let db = Arc::clone(self);
        let timeout = Duration::from_secs(DUCKDB_QUERY_TIMEOUT_SECS);
        tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || {
                let conn = db.try_conn()?;
                f(&conn)
            }),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                "DuckDB query timed out after {}s",
                DUCKDB_QUERY_TIMEOUT_SECS
            );
            DataError::timeout("duckdb", DUCKDB_QUERY_TIMEOUT_SECS)
        })?
        .map_err(|e| {
            tracing::error!(error = %e, "DuckDB query task failed");
            DataError::Io(std::io::Error::other(format!(
                "Query execution failed: {}",
                e
            )))
        })?
    }

    /// Run a checkpoint to flush WAL to the main database file.
    ///
    /// Returns `Ok(())` if the connection is already closed (no-op).
    pub async fn checkpoint(self: &Arc<Self>) -> Result<(), DataError> {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let conn_guard = db.conn.lock();
            if let Some(ref conn) = *conn_guard {
                conn.execute("CHECKPOINT", [])?;
                tracing::debug!("DuckDB checkpoint completed");
            }
            Ok(())
        })
        .await
        .map_err(|e| DataError::Io(std::io::Error::other(e)))?
    }

    /// Close the DuckDB connection gracefully
    pub async fn close(self: Arc<Self>) -> Result<(), DataError> {
        tokio::task::spawn_blocking(move || {
            let mut conn_guard = self.conn.lock();
            if let Some(conn) = conn_guard.take() {
                if let Err(e) = conn.execute("CHECKPOINT", []) {
                    tracing::warn!("CHECKPOINT failed during close: {}", e);
                }
                conn.close().map_err(|(_, e)| DataError::Duckdb(e))?;
                tracing::debug!("DuckDB connection closed");
            }
            Ok(())
        })
        .await
        .map_err(|e| DataError::Io(std::io::Error::other(e)))?
    }

    /// Start the periodic checkpoint task
    pub fn start_checkpoint_task(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let db = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(DUCKDB_CHECKPOINT_INTERVAL_SECS));
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("DuckDB checkpoint task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = db.checkpoint().await {
                            tracing::warn!("DuckDB checkpoint failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

/// Execute a function within a transaction, automatically rolling back on error.
pub(crate) fn in_transaction<F, T>(conn: &Connection, f: F) -> Result<T, DataError>
where
    F: FnOnce(&Connection) -> Result<T, DataError>,
{
    conn.execute_batch("BEGIN TRANSACTION")?;
    match f(conn) {
        Ok(val) => {
            conn.execute_batch("COMMIT")?;
            Ok(val)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                tracing::warn!("ROLLBACK failed after transaction error: {}", rollback_err);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_init() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let result = DuckdbStore::init(&temp_dir.path().join("graph.db")).await;
        assert!(result.is_ok(), "DuckdbStore should initialize successfully");
    }

    #[tokio::test]
    async fn test_store_schema_applied() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = DuckdbStore::init(&temp_dir.path().join("graph.db"))
            .await
            .expect("Init should succeed");

        let conn = store.try_conn().expect("Connection should be open");
        let version: i32 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .expect("Should read schema version");

        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_store_checkpoint() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            DuckdbStore::init(&temp_dir.path().join("graph.db"))
                .await
                .expect("Init should succeed"),
        );

        let result = store.checkpoint().await;
        assert!(result.is_ok(), "Checkpoint should succeed");
    }

    #[tokio::test]
    async fn test_checkpoint_after_close_is_noop() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            DuckdbStore::init(&temp_dir.path().join("graph.db"))
                .await
                .expect("Init should succeed"),
        );

        let store_for_checkpoint = Arc::clone(&store);
        store.close().await.expect("Close should succeed");

        let result = store_for_checkpoint.checkpoint().await;
        assert!(
            result.is_ok(),
            "Checkpoint after close should succeed as no-op"
        );
    }

    #[tokio::test]
    async fn test_conn_after_close_is_unavailable() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            DuckdbStore::init(&temp_dir.path().join("graph.db"))
                .await
                .expect("Init should succeed"),
        );

        let store_after = Arc::clone(&store);
        store.close().await.expect("Close should succeed");

        let err = store_after.try_conn().err().expect("Should be closed");
        assert!(matches!(err, DataError::BackendUnavailable { .. }));
    }
}
