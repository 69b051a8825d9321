//! Blocklisted test endpoints

use crate::ControlPlaneClient;
use crate::error::Result;
use nucleus_core::dto::{BlocklistResponse, BlocklistedTest};

impl ControlPlaneClient {
    /// Fetch tests blocked or quarantined for a repository branch
    ///
    /// A 404 means nothing is blocklisted and yields an empty list.
    pub async fn fetch_blocklist(
        &self,
        repo_id: &str,
        branch: &str,
        build_id: &str,
    ) -> Result<Vec<BlocklistedTest>> {
        let url = self.url("/blocktest");
        let response = self
            .authorized(self.client.get(&url))
            .query(&[("repoID", repo_id), ("branch", branch), ("buildID", build_id)])
            .send()
            .await?;

        match self.handle_response::<BlocklistResponse>(response).await {
            Ok(body) => Ok(body.block_tests),
            Err(e) if e.is_not_found() => {
                tracing::debug!("No blocklisted tests for repo {}", repo_id);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}
