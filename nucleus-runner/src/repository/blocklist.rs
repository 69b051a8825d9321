//! Blocklist repository

use anyhow::{Context, Result};
use async_trait::async_trait;
use nucleus_client::ControlPlaneClient;
use nucleus_core::dto::BlocklistedTest;
use std::sync::Arc;

#[async_trait]
pub trait BlocklistRepository: Send + Sync {
    /// Tests blocked for a repository branch, as maintained by the control plane
    async fn fetch_blocklist(
        &self,
        repo_id: &str,
        branch: &str,
        build_id: &str,
    ) -> Result<Vec<BlocklistedTest>>;
}

pub struct HttpBlocklistRepository {
    client: Arc<ControlPlaneClient>,
}

impl HttpBlocklistRepository {
    pub fn new(client: Arc<ControlPlaneClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlocklistRepository for HttpBlocklistRepository {
    async fn fetch_blocklist(
        &self,
        repo_id: &str,
        branch: &str,
        build_id: &str,
    ) -> Result<Vec<BlocklistedTest>> {
        self.client
            .fetch_blocklist(repo_id, branch, build_id)
            .await
            .context("Failed to fetch blocklist")
    }
}
