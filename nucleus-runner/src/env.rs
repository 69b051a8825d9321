//! Task environment
//!
//! Variables every subprocess of a task sees on top of the runner's own environment.
//! The map is passed explicitly to each command; the process environment is never
//! modified.

use nucleus_core::domain::payload::Payload;
use std::collections::BTreeMap;
use std::path::Path;

pub const TASK_ID: &str = "TASK_ID";
pub const ORG_ID: &str = "ORG_ID";
pub const BUILD_ID: &str = "BUILD_ID";
pub const REPO_ID: &str = "REPO_ID";
pub const TARGET_COMMIT_ID: &str = "TARGET_COMMIT_ID";
pub const BASE_COMMIT_ID: &str = "BASE_COMMIT_ID";
pub const BRANCH_NAME: &str = "BRANCH_NAME";
pub const CODE_COVERAGE_DIR: &str = "CODE_COVERAGE_DIR";
pub const ENV_NAME: &str = "ENV";
pub const REPO_ROOT: &str = "REPO_ROOT";
pub const SUBMODULE_NAME: &str = "SUBMODULE_NAME";
pub const MODULE_PATH: &str = "MODULE_PATH";
pub const ENDPOINT_POST_TEST_LIST: &str = "ENDPOINT_POST_TEST_LIST";
pub const ENDPOINT_POST_TEST_RESULTS: &str = "ENDPOINT_POST_TEST_RESULTS";
pub const BLOCKLISTED_TESTS_FILE: &str = "BLOCKLISTED_TESTS_FILE";
pub const PATH: &str = "PATH";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskEnv {
    vars: BTreeMap<String, String>,
}

impl TaskEnv {
    /// Environment derived from the payload and runner settings
    pub fn for_task(
        payload: &Payload,
        coverage_dir: &Path,
        repo_dir: &Path,
        env_name: &str,
        intake_url: &str,
    ) -> Self {
        let mut env = Self::default();
        env.set(TASK_ID, &payload.task_id);
        env.set(ORG_ID, &payload.org_id);
        env.set(BUILD_ID, &payload.build_id);
        env.set(REPO_ID, &payload.repo_id);
        env.set(TARGET_COMMIT_ID, &payload.build_target_commit);
        env.set(BASE_COMMIT_ID, &payload.build_base_commit);
        env.set(BRANCH_NAME, &payload.branch_name);
        env.set(CODE_COVERAGE_DIR, coverage_dir.to_string_lossy());
        env.set(ENV_NAME, env_name);
        env.set(REPO_ROOT, repo_dir.to_string_lossy());
        env.set(MODULE_PATH, "");
        env.set(ENDPOINT_POST_TEST_LIST, format!("{}/test-list", intake_url));
        env.set(ENDPOINT_POST_TEST_RESULTS, format!("{}/results", intake_url));
        env
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    /// Copy of this environment with `overrides` applied key by key
    pub fn with_overrides(&self, overrides: &BTreeMap<String, String>) -> Self {
        let mut env = self.clone();
        for (key, value) in overrides {
            env.vars.insert(key.clone(), value.clone());
        }
        env
    }

    /// Puts `dir` in front of the search path
    ///
    /// Falls back to the runner's own `PATH` the first time.
    pub fn prepend_path(&mut self, dir: &Path) {
        let current = self
            .get(PATH)
            .map(str::to_string)
            .or_else(|| std::env::var(PATH).ok())
            .unwrap_or_default();
        let dir = dir.to_string_lossy();
        let path = if current.is_empty() {
            dir.to_string()
        } else {
            format!("{}:{}", dir, current)
        };
        self.set(PATH, path);
    }
}
