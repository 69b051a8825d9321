//! Tasks repository
//!
//! Handles task-level communication with the control plane:
//! - Reporting task status transitions
//! - Announcing how many submodules discovery will report
//! - Refreshing expired OAuth tokens

use anyhow::{Context, Result};
use async_trait::async_trait;
use nucleus_client::ControlPlaneClient;
use nucleus_core::domain::payload::Oauth;
use nucleus_core::domain::task::TaskPayload;
use nucleus_core::dto::OauthRefreshRequest;
use std::sync::Arc;

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Sends the current status of the task
    async fn update_status(&self, task: &TaskPayload) -> Result<()>;

    /// Tells the control plane how many discovery results to expect for a build
    async fn send_submodule_count(&self, build_id: &str, total: usize) -> Result<()>;

    /// Exchanges a refresh token for a new access token
    async fn refresh_oauth(&self, request: &OauthRefreshRequest) -> Result<Oauth>;
}

pub struct HttpTaskRepository {
    client: Arc<ControlPlaneClient>,
}

impl HttpTaskRepository {
    pub fn new(client: Arc<ControlPlaneClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskRepository for HttpTaskRepository {
    async fn update_status(&self, task: &TaskPayload) -> Result<()> {
        self.client
            .update_task_status(task)
            .await
            .with_context(|| format!("Failed to update status of task {}", task.task_id))
    }

    async fn send_submodule_count(&self, build_id: &str, total: usize) -> Result<()> {
        self.client
            .send_submodule_count(build_id, total)
            .await
            .context("Failed to send submodule count")
    }

    async fn refresh_oauth(&self, request: &OauthRefreshRequest) -> Result<Oauth> {
        self.client
            .refresh_oauth(request)
            .await
            .context("Failed to refresh oauth token")
    }
}
