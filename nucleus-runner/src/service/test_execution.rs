//! Test execution service
//!
//! Runs the framework runner in execute mode, once per consecutive run, and collects
//! the results each run posts to the intake server.
//!
//! Locators select the tests assigned to this task. They come either inline from the
//! payload (separated by `#TAS#`) or from a file at the payload's locator address, and
//! are handed to the runner as a JSON locator file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nucleus_core::domain::payload::Payload;
use nucleus_core::domain::result::{ExecutionResult, ExecutionResults};
use nucleus_core::domain::tas::Framework;
use nucleus_core::domain::task::TaskType;
use nucleus_core::dto::TestReportResponse;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::api::ResultBroker;
use crate::env::{self, TaskEnv};
use crate::repository::ResultRepository;
use crate::service::execution::{CommandType, ExecutionManager};
use crate::service::log_buffer::LogBuffer;
use crate::service::runner::{ARG_LOCATOR, RunnerInvocation};
use crate::service::secrets::Secrets;

pub const LOCATOR_DELIMITER: &str = "#TAS#";
const LOCATOR_FILE: &str = "locators.json";
const COLLECT_COVERAGE_ENV: &str = "TAS_COLLECT_COVERAGE";

/// Everything one execution needs
#[derive(Debug, Clone)]
pub struct ExecutionArgs {
    pub payload: Arc<Payload>,
    pub framework: Framework,
    pub framework_version: Option<u32>,
    pub patterns: Vec<String>,
    pub env: TaskEnv,
    pub secrets: Arc<Secrets>,
    pub config_file: Option<String>,
    pub cwd: PathBuf,
    pub runs: u32,
    pub task_type: TaskType,
}

#[async_trait]
pub trait TestExecutionService: Send + Sync {
    /// Executes the assigned tests `args.runs` times
    async fn run(&self, args: ExecutionArgs, output: &mut LogBuffer) -> Result<ExecutionResults>;

    /// Forwards results and returns the control plane's verdict
    async fn send_results(&self, results: &ExecutionResults) -> Result<TestReportResponse>;
}

pub struct RunnerExecutionService {
    executor: Arc<dyn ExecutionManager>,
    broker: Arc<ResultBroker>,
    results: Arc<dyn ResultRepository>,
    http: reqwest::Client,
    work_dir: PathBuf,
    timeout: Duration,
}

#[derive(Serialize)]
struct LocatorFile {
    locators: Vec<LocatorEntry>,
}

#[derive(Serialize)]
struct LocatorEntry {
    locator: String,
}

/// Splits inline payload locators
pub fn split_locators(raw: &str) -> Vec<String> {
    raw.split(LOCATOR_DELIMITER)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

impl RunnerExecutionService {
    pub fn new(
        executor: Arc<dyn ExecutionManager>,
        broker: Arc<ResultBroker>,
        results: Arc<dyn ResultRepository>,
        http: reqwest::Client,
        work_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            broker,
            results,
            http,
            work_dir,
            timeout,
        }
    }

    /// Writes the locator file for this task, if the payload assigns any locators
    async fn prepare_locators(&self, payload: &Payload) -> Result<Option<PathBuf>> {
        let path = self.work_dir.join(format!("{}-{}", payload.task_id, LOCATOR_FILE));

        let body = if !payload.locator_address.is_empty() {
            debug!("Downloading locators from {}", payload.locator_address);
            self.http
                .get(&payload.locator_address)
                .send()
                .await
                .context("failed to get locator file")?
                .error_for_status()
                .context("failed to get locator file")?
                .bytes()
                .await
                .context("failed to read locator file")?
                .to_vec()
        } else {
            let locators = split_locators(&payload.locators);
            if locators.is_empty() {
                return Ok(None);
            }
            let file = LocatorFile {
                locators: locators
                    .into_iter()
                    .map(|locator| LocatorEntry { locator })
                    .collect(),
            };
            serde_json::to_vec(&file).context("failed to serialize locators")?
        };

        write_file(&path, &body).await?;
        Ok(Some(path))
    }
}

async fn write_file(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("failed to create locator directory")?;
    }
    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Command line for an execution run
pub fn execution_invocation(args: &ExecutionArgs, locator_file: Option<&Path>) -> RunnerInvocation {
    let mut inv = RunnerInvocation::new(args.framework, args.framework_version, "execute");
    inv.with_targets(args.config_file.as_deref(), &args.patterns);
    if let Some(file) = locator_file {
        inv.arg(ARG_LOCATOR, file.to_string_lossy());
    }

    let nyc = matches!(args.framework, Framework::Jasmine | Framework::Mocha);
    if args.payload.collect_coverage && nyc {
        inv.under_nyc()
    } else {
        inv
    }
}

#[async_trait]
impl TestExecutionService for RunnerExecutionService {
    async fn run(&self, args: ExecutionArgs, output: &mut LogBuffer) -> Result<ExecutionResults> {
        let locator_file = self.prepare_locators(&args.payload).await?;
        let inv = execution_invocation(&args, locator_file.as_deref());

        let mut base_env = args.env.clone();
        if args.payload.collect_coverage {
            base_env.set(COLLECT_COVERAGE_ENV, "true");
        }
        let endpoint = base_env
            .get(env::ENDPOINT_POST_TEST_RESULTS)
            .unwrap_or_default()
            .to_string();

        let payload = &args.payload;
        let mut results = ExecutionResults {
            task_id: payload.task_id.clone(),
            build_id: payload.build_id.clone(),
            repo_id: payload.repo_id.clone(),
            org_id: payload.org_id.clone(),
            commit_id: payload.build_target_commit.clone(),
            task_type: args.task_type,
            results: Vec::new(),
        };

        for run in 1..=args.runs.max(1) {
            let (request_id, mut rx) = self.broker.register_execution();
            let mut run_env = base_env.clone();
            run_env.set(
                env::ENDPOINT_POST_TEST_RESULTS,
                format!("{}/{}", endpoint, request_id),
            );

            debug!("Executing tests, run {} of {}", run, args.runs.max(1));
            let status = self
                .executor
                .run_program(
                    CommandType::Execution,
                    &inv.program,
                    &inv.args,
                    &args.cwd,
                    &run_env,
                    &args.secrets,
                    output,
                )
                .await;

            let received: Option<ExecutionResult> = match status {
                Ok(()) => match tokio::time::timeout(self.timeout, &mut rx).await {
                    Ok(Ok(result)) => Some(result),
                    Ok(Err(_)) => None,
                    Err(_) => {
                        warn!("Timed out waiting for results of run {}", run);
                        None
                    }
                },
                Err(e) => {
                    // failing tests make most runners exit non-zero
                    error!("error in test execution: {:#}", e);
                    match rx.try_recv() {
                        Ok(result) => Some(result),
                        Err(_) => {
                            self.broker.cancel(request_id);
                            return Err(e);
                        }
                    }
                }
            };
            self.broker.cancel(request_id);

            match received {
                Some(result) => results.results.push(result),
                None => anyhow::bail!("test runner reported no results for run {}", run),
            }
        }

        info!(
            "Executed {} tests over {} runs",
            results.test_count(),
            results.results.len()
        );
        Ok(results)
    }

    async fn send_results(&self, results: &ExecutionResults) -> Result<TestReportResponse> {
        self.results.send_execution_results(results).await
    }
}
