//! Task status domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::payload::Payload;

/// Lifecycle state of a task as seen by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Initiating,
    Running,
    Passed,
    Failed,
    Error,
    Aborted,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Initiating => "initiating",
            TaskStatus::Running => "running",
            TaskStatus::Passed => "passed",
            TaskStatus::Failed => "failed",
            TaskStatus::Error => "error",
            TaskStatus::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// What this process was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "discover")]
    Discovery,
    #[serde(rename = "execute")]
    Execution,
    #[serde(rename = "flaky")]
    Flaky,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Discovery => write!(f, "discover"),
            TaskType::Execution => write!(f, "execute"),
            TaskType::Flaky => write!(f, "flaky"),
        }
    }
}

/// Status record reported to the control plane
///
/// Owned by the pipeline; drivers receive it by exclusive reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_id: String,
    pub status: TaskStatus,
    pub repo_slug: String,
    pub repo_link: String,
    pub repo_id: String,
    pub org_id: String,
    pub git_provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_id: String,
    pub build_id: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remark: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
}

impl TaskPayload {
    /// Creates a running status record for the given payload
    pub fn running(payload: &Payload, task_type: TaskType) -> Self {
        Self {
            task_id: payload.task_id.clone(),
            status: TaskStatus::Running,
            repo_slug: payload.repo_slug.clone(),
            repo_link: payload.repo_link.clone(),
            repo_id: payload.repo_id.clone(),
            org_id: payload.org_id.clone(),
            git_provider: payload.git_provider.clone(),
            commit_id: payload.build_target_commit.clone(),
            build_id: payload.build_id.clone(),
            start_time: chrono::Utc::now(),
            end_time: None,
            remark: String::new(),
            task_type,
        }
    }

    /// Records a terminal outcome
    pub fn finish(&mut self, status: TaskStatus, remark: impl Into<String>) {
        self.status = status;
        self.remark = remark.into();
        self.end_time = Some(chrono::Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, TaskStatus::Initiating | TaskStatus::Running)
    }
}
