//! Task payload domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Webhook event that triggered the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "push")]
    Push,
    #[serde(rename = "pull-request")]
    PullRequest,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Push => write!(f, "push"),
            EventType::PullRequest => write!(f, "pull-request"),
        }
    }
}

/// License tier, ordered from smallest to largest machine size
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Internal,
    XSmall,
    #[default]
    Small,
    Medium,
    Large,
    XLarge,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Internal => "internal",
            Tier::XSmall => "xsmall",
            Tier::Small => "small",
            Tier::Medium => "medium",
            Tier::Large => "large",
            Tier::XLarge => "xlarge",
        };
        write!(f, "{}", name)
    }
}

/// Files touched by a single pushed commit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitChangeList {
    #[serde(rename = "Sha", default)]
    pub sha: String,
    #[serde(rename = "Link", default)]
    pub link: String,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub message: String,
}

/// Identifies the build and task this process is running
///
/// Fetched once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub repo_slug: String,
    #[serde(default)]
    pub repo_link: String,
    #[serde(default)]
    pub build_target_commit: String,
    #[serde(default)]
    pub build_base_commit: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub build_id: String,
    #[serde(default)]
    pub repo_id: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub git_provider: String,
    #[serde(default)]
    pub private_repo: bool,
    pub event_type: EventType,
    #[serde(rename = "diff_url", default)]
    pub diff_url: String,
    #[serde(default)]
    pub pull_request_number: u64,
    #[serde(default)]
    pub commits: Vec<CommitChangeList>,
    #[serde(default)]
    pub tas_file_name: String,
    #[serde(default)]
    pub locators: String,
    #[serde(default)]
    pub locator_address: String,
    #[serde(default)]
    pub parent_commit_coverage_exists: bool,
    #[serde(default)]
    pub license_tier: Tier,
    #[serde(default)]
    pub collect_coverage: bool,
}

/// OAuth credentials for the git provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Oauth {
    pub access_token: String,
    pub expiry: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Oauth {
    /// True once the access token is past its expiry
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expiry <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_format() {
        let ev: EventType = serde_json::from_str("\"pull-request\"").unwrap();
        assert_eq!(ev, EventType::PullRequest);
        assert_eq!(EventType::Push.to_string(), "push");
    }

    #[test]
    fn test_tier_ordering() {
        assert!(Tier::XSmall < Tier::Small);
        assert!(Tier::Large < Tier::XLarge);
        let t: Tier = serde_json::from_str("\"xlarge\"").unwrap();
        assert_eq!(t, Tier::XLarge);
    }

    #[test]
    fn test_payload_defaults() {
        let payload: Payload =
            serde_json::from_str(r#"{"repo_id":"r1","event_type":"push"}"#).unwrap();
        assert_eq!(payload.repo_id, "r1");
        assert_eq!(payload.license_tier, Tier::Small);
        assert!(payload.commits.is_empty());
    }

    #[test]
    fn test_oauth_expiry() {
        let now = chrono::Utc::now();
        let token = Oauth {
            access_token: "t".to_string(),
            expiry: now - chrono::Duration::seconds(1),
            refresh_token: String::new(),
            token_type: default_token_type(),
        };
        assert!(token.is_expired(now));
    }
}
