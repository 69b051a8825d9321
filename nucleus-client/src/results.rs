//! Discovery and execution result endpoints

use crate::ControlPlaneClient;
use crate::error::Result;
use nucleus_core::domain::result::{DiscoveryResult, ExecutionResults};
use nucleus_core::dto::{CoverageData, TestReportResponse};

impl ControlPlaneClient {
    // =============================================================================
    // Results
    // =============================================================================

    /// Send the tests discovered for a task (or one submodule of it)
    pub async fn send_discovery_result(&self, result: &DiscoveryResult) -> Result<()> {
        let url = self.url("/test-list");
        let response = self
            .authorized(self.client.post(&url))
            .json(result)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Send execution results and receive the control plane's verdict
    ///
    /// # Returns
    /// The task status the control plane derived from the results
    pub async fn send_execution_results(
        &self,
        results: &ExecutionResults,
    ) -> Result<TestReportResponse> {
        let url = self.url("/report");
        let response = self
            .authorized(self.client.post(&url))
            .json(results)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Send per-commit coverage summaries
    pub async fn send_coverage_data(&self, data: &[CoverageData]) -> Result<()> {
        let url = self.url("/coverage");
        let response = self
            .authorized(self.client.post(&url))
            .json(data)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
