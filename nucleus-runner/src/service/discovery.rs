//! Test discovery service
//!
//! Runs the framework runner in discover mode and waits for the test list it posts
//! to the intake server. Smart runs pass the changed files so the runner can narrow
//! the list to impacted tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nucleus_core::domain::diff::{ChangeKind, Diff};
use nucleus_core::domain::payload::{Payload, Tier};
use nucleus_core::domain::result::DiscoveryResult;
use nucleus_core::domain::tas::{Framework, SplitMode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::ResultBroker;
use crate::env::{self, TaskEnv};
use crate::repository::ResultRepository;
use crate::service::execution::{CommandType, ExecutionManager};
use crate::service::log_buffer::LogBuffer;
use crate::service::runner::{ARG_DIFF, RunnerInvocation};
use crate::service::secrets::Secrets;

const PACKAGE_JSON: &str = "package.json";

/// Scheduling hints copied onto the discovery result
#[derive(Debug, Clone, Default)]
pub struct DiscoveryMeta {
    pub sub_module: String,
    pub parallelism: u32,
    pub split_mode: SplitMode,
    pub tier: Tier,
    pub container_image: String,
}

/// Everything one discovery run needs
#[derive(Debug, Clone)]
pub struct DiscoveryArgs {
    pub payload: Arc<Payload>,
    pub framework: Framework,
    pub framework_version: Option<u32>,
    pub patterns: Vec<String>,
    pub env: TaskEnv,
    pub secrets: Arc<Secrets>,
    pub config_file: Option<String>,
    pub smart_run: bool,
    /// A changed `package.json` forces a full run
    pub package_json_impacts_all: bool,
    pub diff: Diff,
    pub diff_exists: bool,
    /// Config file path relative to the repo root
    pub tas_file_name: String,
    pub cwd: PathBuf,
    pub meta: DiscoveryMeta,
}

#[async_trait]
pub trait TestDiscoveryService: Send + Sync {
    /// Runs discovery and returns the annotated result
    async fn discover(&self, args: DiscoveryArgs, output: &mut LogBuffer) -> Result<DiscoveryResult>;

    /// Forwards a discovery result to the control plane
    async fn send_result(&self, result: &DiscoveryResult) -> Result<()>;
}

pub struct RunnerDiscoveryService {
    executor: Arc<dyn ExecutionManager>,
    broker: Arc<ResultBroker>,
    results: Arc<dyn ResultRepository>,
    timeout: Duration,
}

impl RunnerDiscoveryService {
    pub fn new(
        executor: Arc<dyn ExecutionManager>,
        broker: Arc<ResultBroker>,
        results: Arc<dyn ResultRepository>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            broker,
            results,
            timeout,
        }
    }
}

/// True when every test must be discovered regardless of the diff
pub fn should_impact_all(args: &DiscoveryArgs) -> bool {
    if !args.smart_run {
        return true;
    }
    let tas_file = args.tas_file_name.trim_start_matches("./");
    if args.diff.contains_key(tas_file) {
        return true;
    }
    args.package_json_impacts_all && args.diff.keys().any(|file| file.ends_with(PACKAGE_JSON))
}

/// Command line for a discovery run
pub fn discovery_invocation(args: &DiscoveryArgs) -> RunnerInvocation {
    let mut inv = RunnerInvocation::new(args.framework, args.framework_version, "discover");

    if !should_impact_all(args) {
        if args.diff.is_empty() && args.diff_exists {
            // commits that cancel out leave an empty but valid diff
            inv.flag(ARG_DIFF);
        } else {
            for (file, kind) in &args.diff {
                if *kind != ChangeKind::Removed {
                    inv.arg(ARG_DIFF, file.as_str());
                }
            }
        }
    }

    inv.with_targets(args.config_file.as_deref(), &args.patterns);
    inv
}

fn annotate(result: &mut DiscoveryResult, payload: &Payload, meta: DiscoveryMeta) {
    let fill = |field: &mut String, value: &str| {
        if field.is_empty() {
            *field = value.to_string();
        }
    };
    fill(&mut result.repo_id, &payload.repo_id);
    fill(&mut result.build_id, &payload.build_id);
    fill(&mut result.commit_id, &payload.build_target_commit);
    fill(&mut result.task_id, &payload.task_id);
    fill(&mut result.org_id, &payload.org_id);
    fill(&mut result.branch, &payload.branch_name);

    result.sub_module = meta.sub_module;
    result.parallelism = meta.parallelism;
    result.split_mode = meta.split_mode;
    result.tier = meta.tier;
    result.container_image = meta.container_image;
}

#[async_trait]
impl TestDiscoveryService for RunnerDiscoveryService {
    async fn discover(&self, args: DiscoveryArgs, output: &mut LogBuffer) -> Result<DiscoveryResult> {
        let inv = discovery_invocation(&args);
        let (request_id, rx) = self.broker.register_discovery();

        let mut run_env = args.env.clone();
        let endpoint = run_env
            .get(env::ENDPOINT_POST_TEST_LIST)
            .unwrap_or_default()
            .to_string();
        run_env.set(env::ENDPOINT_POST_TEST_LIST, format!("{}/{}", endpoint, request_id));

        debug!("Discovering tests at paths {:?}", args.patterns);
        let run = self
            .executor
            .run_program(
                CommandType::Discovery,
                &inv.program,
                &inv.args,
                &args.cwd,
                &run_env,
                &args.secrets,
                output,
            )
            .await;
        if let Err(e) = run {
            self.broker.cancel(request_id);
            return Err(e);
        }

        let received = tokio::time::timeout(self.timeout, rx).await;
        self.broker.cancel(request_id);
        let mut result = received
            .context("timed out waiting for discovery result")?
            .context("discovery runner exited without reporting results")?;

        annotate(&mut result, &args.payload, args.meta);
        info!(
            "Discovered {} tests ({} impacted)",
            result.tests.len(),
            result.impacted_tests.len()
        );
        Ok(result)
    }

    async fn send_result(&self, result: &DiscoveryResult) -> Result<()> {
        self.results.send_discovery_result(result).await
    }
}
