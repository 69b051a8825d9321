//! Driver for schema version 1
//!
//! One test module rooted at the repository. Discovery prepares the workspace
//! once (cache, pre-run, runners), snapshots it for the execution tasks and reports
//! a single discovery result.

use async_trait::async_trait;
use nucleus_core::domain::payload::Payload;
use nucleus_core::domain::tas::{Cache, Language, Merge, TasConfig, TasConfigV1};
use nucleus_core::domain::task::{TaskPayload, TaskStatus};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::context::TaskContext;
use crate::driver::cache_key::resolve_cache;
use crate::driver::node::NodeInstaller;
use crate::driver::setup::set_up;
use crate::driver::{
    Collaborators, Driver, DriverSettings, PURPOSE_DISCOVERY_LOGS, PURPOSE_EXECUTION_LOGS,
    PURPOSE_POST_RUN_LOGS, PURPOSE_PRE_RUN_LOGS, fetch_blocklist, install_runners, load_config,
    relative_tas_file, resolve_env, send_submodule_count, store_log,
};
use crate::env::{self, TaskEnv};
use crate::error::{
    DISCOVERY_FAILED, EXECUTION_FAILED, NucleusError, POST_RUN_FAILED, PRE_RUN_FAILED,
};
use crate::service::{CommandType, DiscoveryArgs, DiscoveryMeta, ExecutionArgs, LogBuffer};

pub struct DriverV1 {
    collab: Collaborators,
    settings: DriverSettings,
    node: NodeInstaller,
    tas_path: PathBuf,
}

impl DriverV1 {
    pub fn new(
        collab: Collaborators,
        settings: DriverSettings,
        node: NodeInstaller,
        tas_path: PathBuf,
    ) -> Self {
        Self {
            collab,
            settings,
            node,
            tas_path,
        }
    }

    async fn load(&self, payload: &Payload) -> Result<TasConfigV1, NucleusError> {
        match load_config(&self.collab, 1, &self.tas_path, payload).await? {
            TasConfig::V1(config) => Ok(config),
            other => Err(NucleusError::InvalidVersion(i64::from(other.version()))),
        }
    }

    /// Dependency cache for this run
    ///
    /// Only JavaScript modules fall back to a manifest-derived key.
    async fn cache_for(&self, config: &TasConfigV1) -> Result<Option<Cache>, NucleusError> {
        if config.skip_cache {
            debug!("Dependency cache disabled by configuration");
            return Ok(None);
        }
        if config.framework.language() != Language::JavaScript {
            return Ok(config.cache.clone());
        }
        let repo_dir = self.settings.layout.repo_dir();
        resolve_cache(config.cache.as_ref(), &repo_dir)
            .await
            .map(Some)
            .map_err(|e| {
                error!("Error while computing cache key: {:#}", e);
                NucleusError::Generic
            })
    }

    /// Task environment plus the merge block's env and the blocklist location
    fn module_env(
        &self,
        ctx: &TaskContext,
        merge: &Merge,
        blocklist_file: &Path,
    ) -> Result<TaskEnv, NucleusError> {
        let mut env = ctx.env.with_overrides(&resolve_env(&merge.env, &ctx.secrets)?);
        env.set(env::BLOCKLISTED_TESTS_FILE, blocklist_file.to_string_lossy());
        Ok(env)
    }
}

fn active_merge(config: &TasConfigV1, payload: &Payload) -> Merge {
    config
        .merge_for(payload.event_type)
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl Driver for DriverV1 {
    async fn run_discovery(
        &self,
        ctx: &mut TaskContext,
        status: &mut TaskPayload,
    ) -> Result<(), NucleusError> {
        let config = self.load(&ctx.payload).await?;
        let payload = ctx.payload.clone();
        let layout = &self.settings.layout;
        let repo_dir = layout.repo_dir();
        let is_javascript = config.framework.language() == Language::JavaScript;

        let cache = self.cache_for(&config).await?;
        let blocklist_file = layout.blocklist_file();
        fetch_blocklist(
            self.collab.blocklist.as_ref(),
            &payload,
            &config.blocklist,
            &blocklist_file,
        )
        .await?;

        let setup = set_up(
            self.collab.cache.as_ref(),
            self.collab.diff.as_ref(),
            &payload,
            &ctx.oauth,
            cache.as_ref().map(|c| c.key.clone()),
        )
        .await?;

        send_submodule_count(&self.collab, &payload.build_id, 1).await?;

        if is_javascript {
            if let Some(version) = config.node_version.as_deref().filter(|v| !v.is_empty()) {
                self.node.install(version, &mut ctx.env).await?;
            }
        }

        if let Some(pre_run) = &config.pre_run {
            info!("Running pre-run steps for top module");
            let mut output = LogBuffer::new();
            let result = self
                .collab
                .executor
                .execute_user_commands(
                    CommandType::PreRun,
                    pre_run,
                    &ctx.secrets,
                    &ctx.env,
                    &repo_dir,
                    &mut output,
                )
                .await;
            store_log(
                self.collab.logs.as_ref(),
                &payload.task_id,
                PURPOSE_PRE_RUN_LOGS,
                &output,
            )
            .await;
            if let Err(e) = result {
                error!("Unable to run pre-run steps: {:#}", e);
                return Err(NucleusError::failed(PRE_RUN_FAILED));
            }
        }

        install_runners(self.collab.executor.as_ref(), &repo_dir, &ctx.env).await?;

        debug!("Caching workspace");
        if let Err(e) = self.collab.cache.cache_workspace("").await {
            error!("Error caching workspace: {:#}", e);
            return Err(NucleusError::Generic);
        }

        let merge = active_merge(&config, &payload);
        let args = DiscoveryArgs {
            payload: payload.clone(),
            framework: config.framework,
            framework_version: config.framework_version,
            patterns: merge.patterns.clone(),
            env: self.module_env(ctx, &merge, &blocklist_file)?,
            secrets: ctx.secrets.clone(),
            config_file: config.config_file.clone(),
            smart_run: config.smart_run,
            package_json_impacts_all: true,
            diff: setup.diff,
            diff_exists: setup.diff_exists,
            tas_file_name: relative_tas_file(&self.tas_path, &repo_dir),
            cwd: repo_dir.clone(),
            meta: DiscoveryMeta {
                sub_module: String::new(),
                parallelism: config.parallelism,
                split_mode: config.split_mode,
                tier: config.tier.unwrap_or(payload.license_tier),
                container_image: config.container_image.clone(),
            },
        };

        let mut output = LogBuffer::new();
        let discovered = self.collab.discovery.discover(args, &mut output).await;
        store_log(
            self.collab.logs.as_ref(),
            &payload.task_id,
            PURPOSE_DISCOVERY_LOGS,
            &output,
        )
        .await;
        let result = discovered.map_err(|e| {
            error!("Unable to perform test discovery: {:#}", e);
            NucleusError::failed(DISCOVERY_FAILED)
        })?;

        if let Err(e) = self.collab.discovery.send_result(&result).await {
            error!("error while sending discovery result: {:#}", e);
            return Err(NucleusError::Generic);
        }

        if is_javascript {
            if let Some(cache) = &cache {
                if let Err(e) = self.collab.cache.upload(&setup.cache_key, &cache.paths).await {
                    warn!("Unable to upload cache: {:#}", e);
                }
            }
        }

        status.status = TaskStatus::Passed;
        Ok(())
    }

    async fn run_execution(
        &self,
        ctx: &mut TaskContext,
        status: &mut TaskPayload,
    ) -> Result<(), NucleusError> {
        let config = self.load(&ctx.payload).await?;
        let payload = ctx.payload.clone();
        let repo_dir = self.settings.layout.repo_dir();

        if let Some(cache) = self.cache_for(&config).await? {
            debug!("Using cache key {}", cache.key);
        }

        let blocklist_file = self.settings.layout.blocklist_file();
        fetch_blocklist(
            self.collab.blocklist.as_ref(),
            &payload,
            &config.blocklist,
            &blocklist_file,
        )
        .await?;

        let merge = active_merge(&config, &payload);
        let args = ExecutionArgs {
            payload: payload.clone(),
            framework: config.framework,
            framework_version: config.framework_version,
            patterns: merge.patterns.clone(),
            env: self.module_env(ctx, &merge, &blocklist_file)?,
            secrets: ctx.secrets.clone(),
            config_file: config.config_file.clone(),
            cwd: repo_dir.clone(),
            runs: self.settings.runs_for(status.task_type),
            task_type: status.task_type,
        };

        let mut output = LogBuffer::new();
        let executed = self.collab.execution.run(args, &mut output).await;
        store_log(
            self.collab.logs.as_ref(),
            &payload.task_id,
            PURPOSE_EXECUTION_LOGS,
            &output,
        )
        .await;
        let results = executed.map_err(|e| {
            error!("Unable to perform test execution: {:#}", e);
            NucleusError::failed(EXECUTION_FAILED)
        })?;

        let response = self
            .collab
            .execution
            .send_results(&results)
            .await
            .map_err(|e| {
                error!("error while sending test reports: {:#}", e);
                NucleusError::Generic
            })?;
        status.status = response.task_status;
        status.remark = response.remark;

        if let Some(post_run) = &config.post_run {
            info!("Running post-run steps");
            let mut output = LogBuffer::new();
            let result = self
                .collab
                .executor
                .execute_user_commands(
                    CommandType::PostRun,
                    post_run,
                    &ctx.secrets,
                    &ctx.env,
                    &repo_dir,
                    &mut output,
                )
                .await;
            store_log(
                self.collab.logs.as_ref(),
                &payload.task_id,
                PURPOSE_POST_RUN_LOGS,
                &output,
            )
            .await;
            if let Err(e) = result {
                error!("Unable to run post-run steps: {:#}", e);
                return Err(NucleusError::failed(POST_RUN_FAILED));
            }
        }
        Ok(())
    }
}
