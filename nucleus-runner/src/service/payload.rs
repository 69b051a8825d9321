//! Payload manager
//!
//! Fetches the task payload from its address and checks the fields every task needs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nucleus_core::domain::payload::{EventType, Payload};

#[async_trait]
pub trait PayloadManager: Send + Sync {
    /// Fetches the payload from an http(s) URL or a local file path
    async fn fetch_payload(&self, address: &str) -> Result<Payload>;

    /// Checks that the payload identifies a runnable task
    fn validate_payload(&self, payload: &Payload) -> Result<()>;
}

pub struct HttpPayloadManager {
    client: reqwest::Client,
}

impl HttpPayloadManager {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PayloadManager for HttpPayloadManager {
    async fn fetch_payload(&self, address: &str) -> Result<Payload> {
        if address.starts_with("http://") || address.starts_with("https://") {
            let response = self
                .client
                .get(address)
                .send()
                .await
                .context("failed to request payload")?
                .error_for_status()
                .context("payload request was rejected")?;
            return response.json().await.context("failed to parse payload");
        }

        let raw = tokio::fs::read(address)
            .await
            .with_context(|| format!("failed to read payload from {}", address))?;
        serde_json::from_slice(&raw).context("failed to parse payload")
    }

    fn validate_payload(&self, payload: &Payload) -> Result<()> {
        validate(payload)
    }
}

/// Required-field and event checks shared by every payload source
pub fn validate(payload: &Payload) -> Result<()> {
    let required = [
        ("repo link", &payload.repo_link),
        ("repo slug", &payload.repo_slug),
        ("git provider", &payload.git_provider),
        ("build id", &payload.build_id),
        ("repo id", &payload.repo_id),
        ("branch name", &payload.branch_name),
        ("org id", &payload.org_id),
        ("tas file name", &payload.tas_file_name),
        ("target commit", &payload.build_target_commit),
        ("task id", &payload.task_id),
    ];

    for (name, value) in required {
        if value.trim().is_empty() {
            anyhow::bail!("missing {} in payload", name);
        }
    }

    if payload.event_type == EventType::Push && payload.commits.is_empty() {
        anyhow::bail!("missing commits in push payload");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Payload {
        serde_json::from_value(serde_json::json!({
            "repo_link": "https://github.com/acme/app",
            "repo_slug": "acme/app",
            "git_provider": "github",
            "build_id": "b1",
            "repo_id": "r1",
            "branch_name": "main",
            "org_id": "o1",
            "tas_file_name": ".tas.yml",
            "build_target_commit": "abc",
            "task_id": "t1",
            "event_type": "pull-request",
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_payload() {
        assert!(validate(&payload()).is_ok());
    }

    #[test]
    fn test_missing_field() {
        let mut p = payload();
        p.org_id.clear();
        assert_eq!(validate(&p).unwrap_err().to_string(), "missing org id in payload");
    }

    #[test]
    fn test_push_requires_commits() {
        let mut p = payload();
        p.event_type = EventType::Push;
        assert!(validate(&p).is_err());
        p.commits.push(Default::default());
        assert!(validate(&p).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.json");
        std::fs::write(&path, serde_json::to_vec(&payload()).unwrap()).unwrap();

        let manager = HttpPayloadManager::new(reqwest::Client::new());
        let fetched = manager
            .fetch_payload(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(fetched.task_id, "t1");
    }
}
