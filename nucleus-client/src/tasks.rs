//! Task status endpoints

use crate::ControlPlaneClient;
use crate::error::Result;
use nucleus_core::domain::task::TaskPayload;
use nucleus_core::dto::SubModuleList;

impl ControlPlaneClient {
    // =============================================================================
    // Task Lifecycle
    // =============================================================================

    /// Report the current status of a task
    ///
    /// # Arguments
    /// * `task` - The status record, running or terminal
    pub async fn update_task_status(&self, task: &TaskPayload) -> Result<()> {
        let url = self.url("/task");
        tracing::debug!("Reporting task {} as {}", task.task_id, task.status);
        let response = self
            .authorized(self.client.put(&url))
            .json(task)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Announce how many submodules will report discovery results for a build
    pub async fn send_submodule_count(&self, build_id: &str, total: usize) -> Result<()> {
        let url = self.url("/submodule-list");
        let body = SubModuleList {
            build_id: build_id.to_string(),
            total_sub_module: total,
        };
        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
