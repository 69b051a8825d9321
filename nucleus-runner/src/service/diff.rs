//! Diff manager
//!
//! Computes the files changed between the base and target commits from the local
//! checkout. When no usable base exists the diff is reported as not found, which
//! callers treat as "run everything".

use async_trait::async_trait;
use nucleus_core::domain::diff::{ChangeKind, Diff};
use nucleus_core::domain::payload::{EventType, Oauth, Payload};
use std::path::PathBuf;
use tokio::process::Command;

use crate::error::NucleusError;

#[async_trait]
pub trait DiffManager: Send + Sync {
    /// Changed files of the task's commit range
    ///
    /// Returns [`NucleusError::DiffNotFound`] when the range cannot be resolved.
    async fn get_changed_files(&self, payload: &Payload, oauth: &Oauth) -> Result<Diff, NucleusError>;
}

pub struct GitDiffManager {
    repo_dir: PathBuf,
}

impl GitDiffManager {
    pub fn new(repo_dir: PathBuf) -> Self {
        Self { repo_dir }
    }

    /// Base revision of the range, if one can be determined
    fn base_revision(payload: &Payload) -> Option<String> {
        let base = payload.build_base_commit.trim();
        if !base.is_empty() && base.chars().any(|c| c != '0') {
            return Some(base.to_string());
        }
        match payload.event_type {
            // A push without a base: diff against the parent of the oldest pushed commit
            EventType::Push => payload
                .commits
                .first()
                .filter(|c| !c.sha.is_empty())
                .map(|c| format!("{}^", c.sha)),
            EventType::PullRequest => None,
        }
    }
}

#[async_trait]
impl DiffManager for GitDiffManager {
    async fn get_changed_files(
        &self,
        payload: &Payload,
        _oauth: &Oauth,
    ) -> Result<Diff, NucleusError> {
        let Some(base) = Self::base_revision(payload) else {
            return Err(NucleusError::DiffNotFound);
        };

        let output = Command::new("git")
            .current_dir(&self.repo_dir)
            .args([
                "diff",
                "--name-status",
                base.as_str(),
                payload.build_target_commit.as_str(),
            ])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Error occurred in fetching diff from GitHub: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("unknown revision") || stderr.contains("bad object") {
                tracing::warn!("Base revision {} not available, running all tests", base);
                return Err(NucleusError::DiffNotFound);
            }
            return Err(anyhow::anyhow!(
                "Error occurred in fetching diff from GitHub: {}",
                stderr.trim()
            )
            .into());
        }

        Ok(parse_name_status(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parses `git diff --name-status` output
///
/// Renames count as a removal of the old path and an addition of the new one.
pub fn parse_name_status(output: &str) -> Diff {
    let mut diff = Diff::new();
    for line in output.lines() {
        let mut fields = line.split('\t');
        let (Some(status), Some(path)) = (fields.next(), fields.next()) else {
            continue;
        };
        match status.chars().next() {
            Some('A') => {
                diff.insert(path.to_string(), ChangeKind::Added);
            }
            Some('D') => {
                diff.insert(path.to_string(), ChangeKind::Removed);
            }
            Some('M') | Some('T') => {
                diff.insert(path.to_string(), ChangeKind::Modified);
            }
            Some('R') => {
                diff.insert(path.to_string(), ChangeKind::Removed);
                if let Some(new_path) = fields.next() {
                    diff.insert(new_path.to_string(), ChangeKind::Added);
                }
            }
            Some('C') => {
                if let Some(new_path) = fields.next() {
                    diff.insert(new_path.to_string(), ChangeKind::Added);
                }
            }
            _ => {}
        }
    }
    diff
}
