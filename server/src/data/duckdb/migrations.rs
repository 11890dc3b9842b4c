//! Database schema initialization and migrations
//!
//! Handles schema version tracking and incremental migrations.

use duckdb::Connection;

use super::in_transaction;
use super::schema::{SCHEMA, SCHEMA_VERSION};
use crate::data::error::DataError;

/// Initialize database schema or run pending migrations
pub fn run_migrations(conn: &Connection) -> Result<(), DataError> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM information_schema.tables WHERE table_name = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(false);

    if !table_exists {
        tracing::debug!(
            "Initializing database with schema version {}",
            SCHEMA_VERSION
        );
        apply_initial_schema(conn)?;
        return Ok(());
    }

    let current_version: i32 = conn
        .query_row(
            "SELECT version FROM schema_version WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version > SCHEMA_VERSION {
        return Err(DataError::migration_failed(
            "duckdb",
            current_version,
            "version_check",
            &format!(
                "Database schema version {} is newer than application version {}. Upgrade the application.",
                current_version, SCHEMA_VERSION
            ),
        ));
    }

    if current_version == SCHEMA_VERSION {
        tracing::debug!(
            "Database schema is up to date (version {})",
            current_version
        );
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        tracing::debug!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
    }

    Ok(())
}

fn apply_initial_schema(conn: &Connection) -> Result<(), DataError> {
    let start = std::time::Instant::now();

    in_transaction(conn, |conn| {
        conn.execute_batch(SCHEMA)?;

        let now = chrono::Utc::now().timestamp_micros();
        conn.execute(
            "INSERT INTO schema_version (id, version, applied_at, description) VALUES (1, ?, ?, 'Initial schema')",
            duckdb::params![SCHEMA_VERSION, now],
        )?;

        tracing::debug!(
            "Applied initial schema in {}ms",
            start.elapsed().as_millis()
        );
        Ok(())
    })
}

fn apply_migration(_conn: &Connection, version: i32) -> Result<(), DataError> {
    match version {
        1 => Ok(()), // Handled by apply_initial_schema
        _ => Err(DataError::migration_failed(
            "duckdb",
            version,
            "unknown",
            &format!("Unknown migration version: {}", version),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        Connection::open_in_memory().expect("Failed to create in-memory database")
    }

    #[test]
    fn test_run_migrations_fresh_database() {
        let conn = create_test_db();
        run_migrations(&conn).expect("Migrations should succeed on fresh database");

        let version: i32 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .expect("Should be able to read schema version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_run_migrations_idempotent() {
        let conn = create_test_db();
        run_migrations(&conn).expect("First migration should succeed");
        run_migrations(&conn).expect("Running migrations twice should succeed");
    }

    #[test]
    fn test_apply_migration_unknown_version() {
        let conn = create_test_db();
        run_migrations(&conn).expect("Initial migrations should succeed");

        let result = apply_migration(&conn, 999);
        match result {
            Err(DataError::MigrationFailed { version, .. }) => assert_eq!(version, 999),
            other => panic!("Expected MigrationFailed error, got {:?}", other),
        }
    }
}
