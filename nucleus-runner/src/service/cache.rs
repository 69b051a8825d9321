//! Cache store
//!
//! Keeps dependency caches and workspace snapshots as gzip tarballs on a local
//! volume:
//! - dependency caches: `<cache store dir>/<sha256(key)>.tar.gz`, relative to the home dir
//! - workspaces: `<workspace cache dir>/<submodule>.tar.gz`, containing the repo dir
//!
//! A successful download marks the key as a hit so the matching upload is skipped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::env::TaskEnv;
use crate::layout::WorkspaceLayout;
use crate::service::execution::{CommandType, ExecutionManager, shell_quote};

const WORKSPACE_ARCHIVE: &str = "workspace";

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Restores the dependency cache stored under `key`, if any
    async fn download(&self, key: &str) -> Result<()>;

    /// Stores `paths` under `key`
    ///
    /// Paths are relative to the repo, or to the home dir when they start with `~/`.
    /// Empty `paths` selects the package manager's default directories.
    async fn upload(&self, key: &str, paths: &[String]) -> Result<()>;

    /// Snapshots the prepared repo dir for later execution tasks
    async fn cache_workspace(&self, submodule: &str) -> Result<()>;

    /// Restores a snapshot made by [`CacheStore::cache_workspace`]
    async fn extract_workspace(&self, submodule: &str) -> Result<()>;
}

pub struct LocalCacheStore {
    layout: WorkspaceLayout,
    executor: Arc<dyn ExecutionManager>,
    hits: Mutex<HashSet<String>>,
}

impl LocalCacheStore {
    pub fn new(layout: WorkspaceLayout, executor: Arc<dyn ExecutionManager>) -> Self {
        Self {
            layout,
            executor,
            hits: Mutex::new(HashSet::new()),
        }
    }

    fn archive_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.layout.cache_store_dir().join(format!("{}.tar.gz", digest))
    }

    fn workspace_archive(&self, submodule: &str) -> PathBuf {
        let name = if submodule.is_empty() {
            WORKSPACE_ARCHIVE
        } else {
            submodule
        };
        self.layout
            .workspace_cache_dir()
            .join(format!("{}.tar.gz", name))
    }

    fn is_hit(&self, key: &str) -> bool {
        self.hits
            .lock()
            .map(|hits| hits.contains(key))
            .unwrap_or(false)
    }

    fn mark_hit(&self, key: &str) {
        if let Ok(mut hits) = self.hits.lock() {
            hits.insert(key.to_string());
        }
    }

    /// Archive member for a cache path, relative to the home dir
    fn archive_entry(&self, path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            return PathBuf::from(rest);
        }
        let repo_dir = self.layout.repo_dir();
        let repo = repo_dir
            .strip_prefix(self.layout.home_dir())
            .unwrap_or(Path::new("repo"));
        repo.join(path.trim_start_matches("./"))
    }

    async fn tar(&self, command: String, cwd: &Path) -> Result<()> {
        self.executor
            .execute_internal_commands(CommandType::Archive, &[command], cwd, &TaskEnv::default())
            .await
    }
}

/// Directories worth caching when the configuration declares none
pub async fn default_cache_paths(repo_dir: &Path) -> Vec<String> {
    let exists = |name: &str| {
        let path = repo_dir.join(name);
        async move { tokio::fs::try_exists(path).await.unwrap_or(false) }
    };

    if exists("yarn.lock").await {
        vec![".yarn-cache".to_string(), "node_modules".to_string()]
    } else if exists("package-lock.json").await {
        vec!["~/.npm".to_string(), "node_modules".to_string()]
    } else {
        vec!["node_modules".to_string()]
    }
}

#[async_trait]
impl CacheStore for LocalCacheStore {
    async fn download(&self, key: &str) -> Result<()> {
        let archive = self.archive_path(key);
        if !tokio::fs::try_exists(&archive).await.unwrap_or(false) {
            info!("Cache miss for key {}", key);
            return Ok(());
        }

        let home_dir = self.layout.home_dir();
        let command = format!(
            "tar -xzf {} -C {}",
            shell_quote(&archive.to_string_lossy()),
            shell_quote(&home_dir.to_string_lossy())
        );
        self.tar(command, home_dir)
            .await
            .with_context(|| format!("failed to extract cache for key {}", key))?;

        self.mark_hit(key);
        info!("Restored cache for key {}", key);
        Ok(())
    }

    async fn upload(&self, key: &str, paths: &[String]) -> Result<()> {
        if self.is_hit(key) {
            debug!("Cache hit for key {}, skipping upload", key);
            return Ok(());
        }

        let home_dir = self.layout.home_dir();
        let candidates = if paths.is_empty() {
            default_cache_paths(&self.layout.repo_dir()).await
        } else {
            paths.to_vec()
        };

        let mut present = Vec::new();
        for path in candidates {
            let entry = self.archive_entry(&path);
            if tokio::fs::try_exists(home_dir.join(&entry)).await.unwrap_or(false) {
                present.push(entry);
            } else {
                debug!("Cache path {} does not exist, skipping", path);
            }
        }
        if present.is_empty() {
            warn!("Nothing to cache for key {}", key);
            return Ok(());
        }

        tokio::fs::create_dir_all(self.layout.cache_store_dir())
            .await
            .context("failed to create cache store dir")?;
        let archive = self.archive_path(key);
        let targets: Vec<String> = present
            .iter()
            .map(|p| shell_quote(&p.to_string_lossy()))
            .collect();
        let command = format!(
            "tar -czf {} {}",
            shell_quote(&archive.to_string_lossy()),
            targets.join(" ")
        );
        self.tar(command, home_dir)
            .await
            .with_context(|| format!("failed to store cache for key {}", key))?;

        info!("Stored cache for key {}", key);
        Ok(())
    }

    async fn cache_workspace(&self, submodule: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.layout.workspace_cache_dir())
            .await
            .context("failed to create workspace cache dir")?;
        let archive = self.workspace_archive(submodule);
        let command = format!(
            "tar -czf {} repo",
            shell_quote(&archive.to_string_lossy())
        );
        self.tar(command, self.layout.home_dir())
            .await
            .context("failed to cache workspace")?;
        info!("Cached workspace at {}", archive.display());
        Ok(())
    }

    async fn extract_workspace(&self, submodule: &str) -> Result<()> {
        let archive = self.workspace_archive(submodule);
        let command = format!("tar -xzf {}", shell_quote(&archive.to_string_lossy()));
        self.tar(command, self.layout.home_dir())
            .await
            .context("failed to extract workspace")?;
        info!("Extracted workspace from {}", archive.display());
        Ok(())
    }
}
