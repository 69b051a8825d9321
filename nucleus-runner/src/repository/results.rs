//! Results repository
//!
//! Forwards discovery results, execution results and coverage summaries to the
//! control plane.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nucleus_client::ControlPlaneClient;
use nucleus_core::domain::result::{DiscoveryResult, ExecutionResults};
use nucleus_core::dto::{CoverageData, TestReportResponse};
use std::sync::Arc;

#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn send_discovery_result(&self, result: &DiscoveryResult) -> Result<()>;

    /// Sends execution results and returns the control plane's verdict on them
    async fn send_execution_results(&self, results: &ExecutionResults) -> Result<TestReportResponse>;

    async fn send_coverage(&self, data: &[CoverageData]) -> Result<()>;
}

pub struct HttpResultRepository {
    client: Arc<ControlPlaneClient>,
}

impl HttpResultRepository {
    pub fn new(client: Arc<ControlPlaneClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResultRepository for HttpResultRepository {
    async fn send_discovery_result(&self, result: &DiscoveryResult) -> Result<()> {
        self.client
            .send_discovery_result(result)
            .await
            .context("Failed to send discovery result")
    }

    async fn send_execution_results(&self, results: &ExecutionResults) -> Result<TestReportResponse> {
        self.client
            .send_execution_results(results)
            .await
            .context("Failed to send execution results")
    }

    async fn send_coverage(&self, data: &[CoverageData]) -> Result<()> {
        self.client
            .send_coverage_data(data)
            .await
            .context("Failed to send coverage data")
    }
}
