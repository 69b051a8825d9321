//! Command log storage
//!
//! Persists captured pre-run and post-run output per task. Writes are best-effort:
//! callers log failures and carry on.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Stores the log of one purpose (e.g. "prerun") for a task
    async fn store(&self, task_id: &str, purpose: &str, contents: &str) -> Result<()>;
}

/// Writes logs to `<root>/<task_id>/<purpose>.log`
pub struct FileLogStore {
    root: PathBuf,
}

impl FileLogStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn store(&self, task_id: &str, purpose: &str, contents: &str) -> Result<()> {
        let dir = self.root.join(task_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create log dir {}", dir.display()))?;
        let path = dir.join(format!("{}.log", purpose));
        tokio::fs::write(&path, contents)
            .await
            .with_context(|| format!("failed to write log {}", path.display()))?;
        tracing::debug!("Stored {} log at {}", purpose, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLogStore::new(dir.path().to_path_buf());
        store.store("task-1", "prerun", "hello\n").await.unwrap();
        let written = std::fs::read_to_string(dir.path().join("task-1/prerun.log")).unwrap();
        assert_eq!(written, "hello\n");
    }
}
