//! Platform-aware data storage directory management
//!
//! ## Platform Paths
//!
//! | Type | Windows | macOS | Linux |
//! |------|---------|-------|-------|
//! | Data | `%APPDATA%\AgentGraph\` | `~/Library/Application Support/AgentGraph/` | `$XDG_DATA_HOME/agentgraph/` |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use super::constants::{APP_DOT_FOLDER, APP_NAME, ENV_DATA_DIR};

/// Data subdirectories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSubdir {
    Duckdb,
}

impl DataSubdir {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataSubdir::Duckdb => "duckdb",
        }
    }

    pub const fn all() -> &'static [DataSubdir] {
        &[DataSubdir::Duckdb]
    }
}

/// Application storage manager
#[derive(Debug, Clone)]
pub struct AppStorage {
    data_dir: PathBuf,
}

impl AppStorage {
    /// Initialize storage with the platform-appropriate data directory
    pub async fn init() -> Result<Self> {
        let data_dir = Self::resolve_data_dir();

        // Create directories first (canonicalize requires the path to exist)
        Self::ensure_directories(&data_dir).await?;
        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);

        tracing::debug!(data_dir = %data_dir.display(), "Storage initialized");
        Ok(Self { data_dir })
    }

    /// Resolve data directory from env var or platform default
    pub fn resolve_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            return PathBuf::from(dir);
        }

        if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
            return proj_dirs.data_dir().to_path_buf();
        }

        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        cwd.join(APP_DOT_FOLDER)
    }

    async fn ensure_directories(data_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        for subdir in DataSubdir::all() {
            let path = data_dir.join(subdir.as_str());
            tokio::fs::create_dir_all(&path).await.with_context(|| {
                format!(
                    "Failed to create {} directory: {}",
                    subdir.as_str(),
                    path.display()
                )
            })?;
        }
        Ok(())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn subdir(&self, subdir: DataSubdir) -> PathBuf {
        self.data_dir.join(subdir.as_str())
    }

    /// Create storage rooted at an explicit directory (test utility)
    #[cfg(test)]
    pub fn init_for_test(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdir_path() {
        let storage = AppStorage::init_for_test(PathBuf::from("/tmp/agentgraph-test"));
        assert_eq!(
            storage.subdir(DataSubdir::Duckdb),
            PathBuf::from("/tmp/agentgraph-test/duckdb")
        );
    }

    #[tokio::test]
    async fn test_ensure_directories() {
        let temp = tempfile::tempdir().unwrap();
        let data_dir = temp.path().join("data");
        AppStorage::ensure_directories(&data_dir).await.unwrap();
        assert!(data_dir.join("duckdb").is_dir());
    }
}
