//! Data storage layer
//!
//! Provides the store services for the engine:
//! - `memory` - In-process backend for development and tests
//! - `duckdb` - Embedded columnar warehouse backend
//! - `types` - Shared data types across backends
//! - `traits` - Repository trait for multi-backend support
//! - `error` - Unified error type for all backends

pub mod duckdb;
pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use duckdb::DuckdbStore;
pub use error::DataError;
pub use memory::MemoryStore;
pub use traits::GraphRepository;
pub use types::{
    AGGREGATE_SCHEMA_VERSION, BucketRows, EdgeAggregate, NodeAggregate, ParticipantKind,
    SpanRecord,
};

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::StoreBackend;
use crate::core::constants::DUCKDB_DB_FILENAME;
use crate::core::storage::{AppStorage, DataSubdir};

/// Store service enum
///
/// Wraps the underlying backend-specific store (memory or DuckDB).
/// Services are stored as Arc to enable safe extraction.
pub enum StoreService {
    /// In-process backend (default for development)
    Memory(Arc<MemoryStore>),
    /// DuckDB backend (embedded columnar warehouse)
    Duckdb(Arc<DuckdbStore>),
}

impl StoreService {
    /// Initialize the store service based on configuration
    pub async fn init(backend: StoreBackend, storage: &AppStorage) -> Result<Self, DataError> {
        match backend {
            StoreBackend::Memory => Ok(Self::Memory(Arc::new(MemoryStore::new()))),
            StoreBackend::Duckdb => {
                let db_path = storage.subdir(DataSubdir::Duckdb).join(DUCKDB_DB_FILENAME);
                let store = DuckdbStore::init(&db_path).await?;
                Ok(Self::Duckdb(Arc::new(store)))
            }
        }
    }

    /// Get the backend type
    pub fn backend(&self) -> StoreBackend {
        match self {
            Self::Memory(_) => StoreBackend::Memory,
            Self::Duckdb(_) => StoreBackend::Duckdb,
        }
    }

    /// Get the repository trait object for data operations
    pub fn repository(&self) -> Box<dyn GraphRepository> {
        match self {
            Self::Memory(m) => Box::new(Arc::clone(m)),
            Self::Duckdb(d) => Box::new(Arc::clone(d)),
        }
    }

    /// Run a checkpoint operation (no-op for the memory backend)
    pub async fn checkpoint(&self) -> Result<(), DataError> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::Duckdb(d) => d.checkpoint().await,
        }
    }

    /// Close the store gracefully
    pub async fn close(&self) -> Result<(), DataError> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::Duckdb(d) => Arc::clone(d).close().await,
        }
    }

    /// Start the background checkpoint task (DuckDB only)
    pub fn start_checkpoint_task(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        match self {
            Self::Memory(_) => None,
            Self::Duckdb(d) => Some(d.start_checkpoint_task(shutdown_rx)),
        }
    }
}
