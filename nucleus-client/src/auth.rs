//! OAuth token refresh

use crate::ControlPlaneClient;
use crate::error::Result;
use nucleus_core::domain::payload::Oauth;
use nucleus_core::dto::OauthRefreshRequest;

impl ControlPlaneClient {
    /// Exchange a refresh token for a fresh access token
    pub async fn refresh_oauth(&self, req: &OauthRefreshRequest) -> Result<Oauth> {
        let url = self.url("/oauth/refresh");
        let response = self
            .authorized(self.client.post(&url))
            .json(req)
            .send()
            .await?;

        self.handle_response(response).await
    }
}
