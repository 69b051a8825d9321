//! Filesystem layout of the task container
//!
//! Every path the runner touches is derived from a single home directory so the
//! whole layout can be relocated (tests point it at a temporary directory).

use std::path::{Path, PathBuf};

pub const DEFAULT_HOME_DIR: &str = "/home/nucleus";
pub const DEFAULT_SECRETS_DIR: &str = "/vault/secrets";

#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    home_dir: PathBuf,
    secrets_dir: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(home_dir: impl Into<PathBuf>, secrets_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            secrets_dir: secrets_dir.into(),
        }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    /// Checkout of the repository under test
    pub fn repo_dir(&self) -> PathBuf {
        self.home_dir.join("repo")
    }

    /// Root under which per-commit coverage directories live
    pub fn coverage_root(&self) -> PathBuf {
        self.repo_dir().join("coverage")
    }

    /// Coverage directory of one commit
    pub fn commit_coverage_dir(&self, org_id: &str, repo_id: &str, commit: &str) -> PathBuf {
        self.coverage_root().join(org_id).join(repo_id).join(commit)
    }

    /// Archives of the prepared workspace, shared between discovery and execution
    pub fn workspace_cache_dir(&self) -> PathBuf {
        self.home_dir.join("workspace-cache")
    }

    /// Dependency cache archives keyed by cache key
    pub fn cache_store_dir(&self) -> PathBuf {
        self.home_dir.join("cache-store")
    }

    /// Captured command logs
    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join("logs")
    }

    /// Merged blocklist consumed by single-module runners
    pub fn blocklist_file(&self) -> PathBuf {
        self.repo_dir().join("blocklist.json")
    }

    pub fn nvm_script(&self) -> PathBuf {
        self.home_dir.join(".nvm").join("nvm.sh")
    }

    /// Bin directory of an nvm-installed node version
    pub fn node_bin_dir(&self, version: &str) -> PathBuf {
        self.home_dir
            .join(".nvm")
            .join("versions")
            .join("node")
            .join(format!("v{}", version.trim_start_matches('v')))
            .join("bin")
    }

    pub fn oauth_secret_path(&self) -> PathBuf {
        self.secrets_dir.join("oauth")
    }

    pub fn repo_secret_path(&self) -> PathBuf {
        self.secrets_dir.join("reposecrets")
    }
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self::new(DEFAULT_HOME_DIR, DEFAULT_SECRETS_DIR)
    }
}
