//! Versioned task drivers
//!
//! A driver carries a task through discovery or execution for one configuration
//! schema version:
//! - [`DriverV1`]: a single test module at the repository root
//! - [`DriverV2`]: path-scoped submodules, fanned out with a bounded concurrency limit
//!
//! Drivers never report status themselves. They record the outcome on the
//! [`TaskPayload`] they are handed and return a [`NucleusError`] the pipeline
//! classifies.

mod builder;
mod cache_key;
mod diff;
mod fanout;
mod node;
mod setup;
mod v1;
mod v2;

use async_trait::async_trait;
use nucleus_core::domain::payload::Payload;
use nucleus_core::domain::tas::TasConfig;
use nucleus_core::domain::task::{TaskPayload, TaskType};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, warn};

use crate::context::TaskContext;
use crate::env::TaskEnv;
use crate::error::NucleusError;
use crate::layout::WorkspaceLayout;
use crate::repository::TaskRepository;
use crate::service::{
    BlocklistService, CacheStore, CommandType, DiffManager, ExecutionManager,
    INSTALL_RUNNERS_COMMAND, LogBuffer, LogStore, Secrets, TasConfigManager,
    TestDiscoveryService, TestExecutionService, substitute_env,
};

// Re-export implementations
pub use builder::Builder;
pub use v1::DriverV1;
pub use v2::DriverV2;

// Re-export helpers
pub use cache_key::resolve_cache;
pub use diff::{normalize_module_path, rebase_diff};
pub use node::NodeInstaller;
pub use setup::{SetUpResult, set_up};

pub const PURPOSE_PRE_RUN_LOGS: &str = "prerun";
pub const PURPOSE_DISCOVERY_LOGS: &str = "discovery";
pub const PURPOSE_EXECUTION_LOGS: &str = "execution";
pub const PURPOSE_POST_RUN_LOGS: &str = "postrun";

#[async_trait]
pub trait Driver: Send + Sync {
    /// Prepares the workspace, discovers tests and reports them
    async fn run_discovery(
        &self,
        ctx: &mut TaskContext,
        status: &mut TaskPayload,
    ) -> Result<(), NucleusError>;

    /// Executes the tests assigned to this task and reports the results
    async fn run_execution(
        &self,
        ctx: &mut TaskContext,
        status: &mut TaskPayload,
    ) -> Result<(), NucleusError>;
}

/// Services shared by every driver version
#[derive(Clone)]
pub struct Collaborators {
    pub tas_config: Arc<dyn TasConfigManager>,
    pub executor: Arc<dyn ExecutionManager>,
    pub cache: Arc<dyn CacheStore>,
    pub diff: Arc<dyn DiffManager>,
    pub blocklist: Arc<dyn BlocklistService>,
    pub discovery: Arc<dyn TestDiscoveryService>,
    pub execution: Arc<dyn TestExecutionService>,
    pub tasks: Arc<dyn TaskRepository>,
    pub logs: Arc<dyn LogStore>,
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub layout: WorkspaceLayout,
    pub max_parallel_submodules: usize,
    /// Executions per flaky task
    pub consecutive_runs: u32,
}

impl DriverSettings {
    pub fn runs_for(&self, task_type: TaskType) -> u32 {
        match task_type {
            TaskType::Flaky => self.consecutive_runs.max(1),
            TaskType::Discovery | TaskType::Execution => 1,
        }
    }
}

/// Loads the configuration file; validation errors become the failure remark
async fn load_config(
    collab: &Collaborators,
    version: i64,
    path: &Path,
    payload: &Payload,
) -> Result<TasConfig, NucleusError> {
    collab
        .tas_config
        .load_and_validate(version, path, payload.event_type, payload.license_tier)
        .await
        .map_err(|e| {
            error!("Unable to load configuration file, error: {:#}", e);
            NucleusError::failed(e.to_string())
        })
}

/// Resolves `${{ secrets.X }}` references in a configured env map
fn resolve_env(
    env: &BTreeMap<String, String>,
    secrets: &Secrets,
) -> Result<BTreeMap<String, String>, NucleusError> {
    substitute_env(env, secrets).map_err(|e| NucleusError::failed(e.to_string()))
}

/// Persists captured command output; failures are only logged
async fn store_log(logs: &dyn LogStore, task_id: &str, purpose: &str, buffer: &LogBuffer) {
    if buffer.is_empty() {
        return;
    }
    if let Err(e) = logs.store(task_id, purpose, buffer.as_str()).await {
        warn!("error in writing {} log, error {:#}", purpose, e);
    }
}

/// Reports how many discovery results the control plane should expect
async fn send_submodule_count(
    collab: &Collaborators,
    build_id: &str,
    total: usize,
) -> Result<(), NucleusError> {
    collab
        .tasks
        .send_submodule_count(build_id, total)
        .await
        .map_err(|e| {
            error!("Unable to send submodule count: {:#}", e);
            NucleusError::Generic
        })
}

/// Writes the merged blocklist to `dest`; failures are not shown to the user
async fn fetch_blocklist(
    blocklist: &dyn BlocklistService,
    payload: &Payload,
    yml: &[String],
    dest: &Path,
) -> Result<(), NucleusError> {
    blocklist
        .get_blocked_tests(payload, yml, dest)
        .await
        .map_err(|e| {
            error!("Unable to fetch blocklisted tests: {:#}", e);
            NucleusError::Generic
        })
}

/// Unpacks the framework runners into `dir`
async fn install_runners(
    executor: &dyn ExecutionManager,
    dir: &Path,
    env: &TaskEnv,
) -> Result<(), NucleusError> {
    executor
        .execute_internal_commands(
            CommandType::InstallRunners,
            &[INSTALL_RUNNERS_COMMAND.to_string()],
            dir,
            env,
        )
        .await
        .map_err(|e| {
            error!("Unable to install custom runners at {}: {:#}", dir.display(), e);
            NucleusError::Generic
        })
}

/// Configuration file path as it appears in diffs
fn relative_tas_file(tas_path: &Path, repo_dir: &Path) -> String {
    tas_path
        .strip_prefix(repo_dir)
        .unwrap_or(tas_path)
        .to_string_lossy()
        .to_string()
}
