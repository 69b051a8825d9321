//! Data Transfer Objects for control-plane communication
//!
//! Request and response bodies that only exist on the wire.

use serde::{Deserialize, Serialize};

use crate::domain::task::TaskStatus;

/// Number of submodules discovery will report results for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubModuleList {
    #[serde(rename = "buildID")]
    pub build_id: String,
    #[serde(rename = "totalSubModule")]
    pub total_sub_module: usize,
}

/// Control-plane verdict on a batch of execution results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReportResponse {
    #[serde(rename = "taskStatus")]
    pub task_status: TaskStatus,
    #[serde(default)]
    pub remark: String,
}

/// A single blocked or quarantined test, as returned by the blocklist endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocklistedTest {
    pub source: String,
    pub locator: String,
    #[serde(default)]
    pub status: String,
}

/// Body of the blocklist endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlocklistResponse {
    #[serde(default, rename = "blockTests")]
    pub block_tests: Vec<BlocklistedTest>,
}

/// Request for a fresh OAuth access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthRefreshRequest {
    #[serde(rename = "orgID")]
    pub org_id: String,
    #[serde(rename = "gitProvider")]
    pub git_provider: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

/// Coverage summary of one commit, as produced by coverage mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageData {
    pub build_id: String,
    pub repo_id: String,
    pub commit_id: String,
    /// Location of the merged coverage report
    pub blob_link: String,
    pub total_coverage: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submodule_list_wire_names() {
        let body = SubModuleList {
            build_id: "b-1".to_string(),
            total_sub_module: 3,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["buildID"], "b-1");
        assert_eq!(json["totalSubModule"], 3);
    }

    #[test]
    fn test_report_response_without_remark() {
        let resp: TestReportResponse =
            serde_json::from_str(r#"{"taskStatus":"failed"}"#).unwrap();
        assert_eq!(resp.task_status, TaskStatus::Failed);
        assert!(resp.remark.is_empty());
    }
}
