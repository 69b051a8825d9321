//! Discovery and execution result types
//!
//! Framework runners post these to the local intake server; the task runner annotates
//! them and forwards them to the control plane.

use serde::{Deserialize, Serialize};

use crate::domain::payload::Tier;
use crate::domain::tas::SplitMode;
use crate::domain::task::TaskType;

/// A test found during discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveredTest {
    #[serde(rename = "testID", default)]
    pub test_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "suiteID", default)]
    pub suite_id: String,
    #[serde(rename = "file", default)]
    pub file_path: String,
    #[serde(rename = "locator", default)]
    pub locator: String,
}

/// A test suite found during discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveredSuite {
    #[serde(rename = "suiteID", default)]
    pub suite_id: String,
    #[serde(rename = "suiteName", default)]
    pub suite_name: String,
    #[serde(rename = "parentSuiteID", default)]
    pub parent_suite_id: String,
}

/// Output of one discovery run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    #[serde(default)]
    pub tests: Vec<DiscoveredTest>,
    #[serde(default)]
    pub impacted_tests: Vec<String>,
    #[serde(default)]
    pub test_suites: Vec<DiscoveredSuite>,
    #[serde(default)]
    pub execute_all_tests: bool,
    #[serde(rename = "repoID", default)]
    pub repo_id: String,
    #[serde(rename = "buildID", default)]
    pub build_id: String,
    #[serde(rename = "commitID", default)]
    pub commit_id: String,
    #[serde(rename = "taskID", default)]
    pub task_id: String,
    #[serde(rename = "orgID", default)]
    pub org_id: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub sub_module: String,
    #[serde(default)]
    pub parallelism: u32,
    #[serde(default)]
    pub split_mode: SplitMode,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub container_image: String,
}

/// Result of a single test case
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestPayload {
    #[serde(rename = "testID", default)]
    pub test_id: String,
    #[serde(rename = "suiteID", default)]
    pub suite_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "fullTitle", default)]
    pub full_title: String,
    #[serde(default)]
    pub duration: u64,
    #[serde(rename = "file", default)]
    pub file_path: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "locator", default)]
    pub locator: String,
    #[serde(rename = "blocklist", default)]
    pub blocklisted: bool,
    #[serde(rename = "blocklistSource", default)]
    pub blocklist_source: String,
}

/// Result of a single test suite
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSuitePayload {
    #[serde(rename = "suiteID", default)]
    pub suite_id: String,
    #[serde(rename = "suiteName", default)]
    pub suite_name: String,
    #[serde(rename = "parentSuiteID", default)]
    pub parent_suite_id: String,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub status: String,
}

/// Results of one execution run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(rename = "testResults", default)]
    pub test_payload: Vec<TestPayload>,
    #[serde(rename = "testSuiteResults", default)]
    pub test_suite_payload: Vec<TestSuitePayload>,
}

/// Results of every execution run of a task
///
/// Flaky tasks execute several consecutive runs and report them together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResults {
    #[serde(rename = "taskID")]
    pub task_id: String,
    #[serde(rename = "buildID")]
    pub build_id: String,
    #[serde(rename = "repoID")]
    pub repo_id: String,
    #[serde(rename = "orgID")]
    pub org_id: String,
    #[serde(rename = "commitID")]
    pub commit_id: String,
    #[serde(rename = "taskType")]
    pub task_type: TaskType,
    pub results: Vec<ExecutionResult>,
}

impl ExecutionResults {
    pub fn test_count(&self) -> usize {
        self.results.iter().map(|r| r.test_payload.len()).sum()
    }
}
