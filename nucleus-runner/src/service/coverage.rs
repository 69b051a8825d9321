//! Coverage service
//!
//! Coverage mode runs after every task of a build has written its per-test-file
//! coverage under `<coverage root>/<org>/<repo>/<commit>/<test file dir>/`.
//! For each commit of the build, oldest first:
//! - test files that did not run inherit coverage from the previous commit
//! - the per-file reports are merged into `coverage-merged.json`
//! - the total from the merged report is sent to the control plane

use anyhow::{Context, Result};
use async_trait::async_trait;
use nucleus_core::domain::payload::Payload;
use nucleus_core::dto::CoverageData;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::env::TaskEnv;
use crate::layout::WorkspaceLayout;
use crate::repository::ResultRepository;
use crate::service::execution::{CommandType, ExecutionManager, shell_quote};

const COVERAGE_FILE: &str = "coverage-final.json";
const MERGED_FILE: &str = "coverage-merged.json";
const MANIFEST_FILE: &str = "manifest.json";
const MERGE_SCRIPT: &str = "/scripts/mapCoverage.js";
const BABEL_NODE: &str = "/scripts/node_modules/.bin/babel-node";

/// Written by the execution tasks next to their coverage
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoverageManifest {
    #[serde(default)]
    pub removed_files: Vec<String>,
    #[serde(default)]
    pub all_files_executed: bool,
    #[serde(default)]
    pub coverage_threshold: Option<serde_json::Value>,
}

#[async_trait]
pub trait CoverageService: Send + Sync {
    /// Merges the coverage of every commit in the payload and reports the totals
    async fn merge_and_upload(&self, payload: &Payload) -> Result<()>;
}

pub struct StandardCoverageService {
    layout: WorkspaceLayout,
    executor: Arc<dyn ExecutionManager>,
    results: Arc<dyn ResultRepository>,
}

impl StandardCoverageService {
    pub fn new(
        layout: WorkspaceLayout,
        executor: Arc<dyn ExecutionManager>,
        results: Arc<dyn ResultRepository>,
    ) -> Self {
        Self {
            layout,
            executor,
            results,
        }
    }

    async fn merge(&self, commit_dir: &Path, manifest: &CoverageManifest) -> Result<()> {
        let files = find_coverage_files(commit_dir).await?;
        if files.is_empty() {
            anyhow::bail!("no coverage dirs found");
        }
        let command = merge_command(commit_dir, &files, manifest.coverage_threshold.is_some());
        self.executor
            .execute_internal_commands(
                CommandType::CoverageMerge,
                &[command],
                commit_dir,
                &TaskEnv::default(),
            )
            .await
    }

    /// Copies test file dirs missing from `commit_dir` out of `parent_dir`
    async fn inherit(&self, parent_dir: &Path, commit_dir: &Path, removed: &[String]) -> Result<()> {
        let mut entries = tokio::fs::read_dir(parent_dir)
            .await
            .with_context(|| format!("Parent commit directory {} not found", parent_dir.display()))?;

        let mut commands = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if removed.iter().any(|r| *r == name) {
                continue;
            }
            let dest = commit_dir.join(&name);
            if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
                continue;
            }
            commands.push(format!(
                "cp -R {} {}",
                shell_quote(&entry.path().to_string_lossy()),
                shell_quote(&dest.to_string_lossy())
            ));
        }

        debug!("Inheriting {} test file dirs from {}", commands.len(), parent_dir.display());
        self.executor
            .execute_internal_commands(CommandType::CoverageMerge, &commands, commit_dir, &TaskEnv::default())
            .await
    }
}

/// Internal command merging per-file coverage reports of one commit
pub fn merge_command(commit_dir: &Path, files: &[PathBuf], threshold: bool) -> String {
    let files: Vec<String> = files.iter().map(|f| f.to_string_lossy().to_string()).collect();
    let mut command = format!(
        "{} {} --commitDir {} --coverageFiles '{}'",
        BABEL_NODE,
        MERGE_SCRIPT,
        commit_dir.display(),
        files.join(" ")
    );
    if threshold {
        command.push_str(&format!(
            " --coverageManifest {}",
            commit_dir.join(MANIFEST_FILE).display()
        ));
    }
    command
}

/// All `coverage-final.json` files below `dir`, sorted
pub async fn find_coverage_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .with_context(|| format!("failed to read {}", current.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                pending.push(entry.path());
            } else if entry.file_name() == COVERAGE_FILE {
                found.push(entry.path());
            }
        }
    }
    found.sort();
    Ok(found)
}

async fn read_manifest(path: &Path) -> Result<CoverageManifest> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("manifest file not found in path {}", path.display()))?;
    serde_json::from_slice(&raw).context("failed to parse manifest file")
}

async fn total_coverage(path: &Path) -> Result<serde_json::Value> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("coverage summary file not found in path {}", path.display()))?;
    let mut summary: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(&raw).context("failed to parse coverage summary")?;
    summary
        .remove("total")
        .context("total coverage summary not found in map")
}

#[async_trait]
impl CoverageService for StandardCoverageService {
    async fn merge_and_upload(&self, payload: &Payload) -> Result<()> {
        let mut commits: Vec<&str> = payload.commits.iter().map(|c| c.sha.as_str()).collect();
        if commits.is_empty() {
            commits.push(payload.build_target_commit.as_str());
        }

        let mut parent_dir: Option<PathBuf> = None;
        let mut data = Vec::with_capacity(commits.len());
        for commit in commits {
            let commit_dir =
                self.layout
                    .commit_coverage_dir(&payload.org_id, &payload.repo_id, commit);
            if !tokio::fs::try_exists(&commit_dir).await.unwrap_or(false) {
                anyhow::bail!("code coverage directory not found for commit {}", commit);
            }

            let manifest = read_manifest(&commit_dir.join(MANIFEST_FILE)).await?;
            if !manifest.all_files_executed {
                if let Some(parent) = &parent_dir {
                    self.inherit(parent, &commit_dir, &manifest.removed_files)
                        .await?;
                }
            }

            self.merge(&commit_dir, &manifest)
                .await
                .context("failed to merge coverage files")?;

            let merged = commit_dir.join(MERGED_FILE);
            data.push(CoverageData {
                build_id: payload.build_id.clone(),
                repo_id: payload.repo_id.clone(),
                commit_id: commit.to_string(),
                blob_link: merged.to_string_lossy().to_string(),
                total_coverage: total_coverage(&merged).await?,
            });
            info!("Merged coverage for commit {}", commit);
            parent_dir = Some(commit_dir);
        }

        self.results.send_coverage(&data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_command() {
        let files = vec![
            PathBuf::from("/cov/c1/a/coverage-final.json"),
            PathBuf::from("/cov/c1/b/coverage-final.json"),
        ];
        let cmd = merge_command(Path::new("/cov/c1"), &files, false);
        assert_eq!(
            cmd,
            "/scripts/node_modules/.bin/babel-node /scripts/mapCoverage.js --commitDir /cov/c1 \
             --coverageFiles '/cov/c1/a/coverage-final.json /cov/c1/b/coverage-final.json'"
        );
        let cmd = merge_command(Path::new("/cov/c1"), &files, true);
        assert!(cmd.ends_with("--coverageManifest /cov/c1/manifest.json"));
    }

    #[tokio::test]
    async fn test_find_coverage_files_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("a/nested/coverage-final.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b/coverage-final.json"), "{}").unwrap();
        std::fs::write(dir.path().join("b/other.json"), "{}").unwrap();

        let files = find_coverage_files(dir.path()).await.unwrap();
        assert_eq!(
            files,
            vec![
                dir.path().join("a/nested/coverage-final.json"),
                dir.path().join("b/coverage-final.json")
            ]
        );
    }

    #[tokio::test]
    async fn test_total_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MERGED_FILE);
        std::fs::write(&path, r#"{"total":{"lines":{"pct":87.5}},"a.js":{}}"#).unwrap();
        let total = total_coverage(&path).await.unwrap();
        assert_eq!(total["lines"]["pct"], 87.5);

        std::fs::write(&path, r#"{"a.js":{}}"#).unwrap();
        assert!(total_coverage(&path).await.is_err());
    }

    #[test]
    fn test_manifest_defaults() {
        let manifest: CoverageManifest = serde_json::from_str(r#"{"removed_files":["x"]}"#).unwrap();
        assert!(!manifest.all_files_executed);
        assert!(manifest.coverage_threshold.is_none());
    }
}
