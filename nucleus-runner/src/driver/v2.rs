//! Driver for schema version 2
//!
//! The active merge block lists path-scoped submodules. Discovery runs in two
//! fan-out phases separated by a barrier:
//! - pre-run: each submodule runs its pre-run, installs the runners and writes its
//!   blocklist, logging into a private buffer
//! - discovery: each submodule discovers against its rebased diff and reports
//!
//! The workspace is cached once between the phases, and only when every pre-run
//! succeeded. Buffers are joined in declaration order after each barrier.

use async_trait::async_trait;
use nucleus_core::domain::payload::Payload;
use nucleus_core::domain::tas::{MergeV2, Run, SubModule, TasConfig, TasConfigV2};
use nucleus_core::domain::task::{TaskPayload, TaskStatus};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::context::TaskContext;
use crate::driver::cache_key::resolve_cache;
use crate::driver::diff::{normalize_module_path, rebase_diff};
use crate::driver::fanout::{fan_out, first_error};
use crate::driver::node::NodeInstaller;
use crate::driver::setup::{SetUpResult, set_up};
use crate::driver::{
    Collaborators, Driver, DriverSettings, PURPOSE_DISCOVERY_LOGS, PURPOSE_EXECUTION_LOGS,
    PURPOSE_POST_RUN_LOGS, PURPOSE_PRE_RUN_LOGS, fetch_blocklist, install_runners, load_config,
    relative_tas_file, resolve_env, send_submodule_count, store_log,
};
use crate::env::{self, TaskEnv};
use crate::error::{
    DISCOVERY_FAILED, EXECUTION_FAILED, NucleusError, POST_RUN_FAILED, PRE_RUN_FAILED,
};
use crate::service::{
    BlocklistService, CommandType, DiscoveryArgs, DiscoveryMeta, ExecutionArgs, ExecutionManager,
    LogBuffer, Secrets, TestDiscoveryService,
};

const TOP_LEVEL_PRE_RUN: &str = "Running Pre Run on Top level";
const BLOCKLIST_FILE: &str = "blocklist.json";

/// A submodule resolved against the checkout
#[derive(Debug, Clone)]
struct ModuleUnit {
    module: SubModule,
    dir: PathBuf,
    env: TaskEnv,
    blocklist_file: PathBuf,
}

pub struct DriverV2 {
    collab: Collaborators,
    settings: DriverSettings,
    node: NodeInstaller,
    tas_path: PathBuf,
}

impl DriverV2 {
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

    async fn load(&self, payload: &Payload) -> Result<TasConfigV2, NucleusError> {
        match load_config(&self.collab, 2, &self.tas_path, payload).await? {
            TasConfig::V2(config) => Ok(config),
            other => Err(NucleusError::InvalidVersion(i64::from(other.version()))),
        }
    }

    /// Merge-block env, overridden by the submodule's pre-run env, plus module variables
    fn module_unit(
        &self,
        ctx: &TaskContext,
        merge: &MergeV2,
        module: &SubModule,
    ) -> Result<ModuleUnit, NucleusError> {
        let relative = normalize_module_path(&module.path);
        let relative = relative.trim_end_matches('/');
        let repo_dir = self.settings.layout.repo_dir();
        let dir = if relative.is_empty() {
            repo_dir
        } else {
            repo_dir.join(relative)
        };

        let mut overrides = resolve_env(&merge.env, &ctx.secrets)?;
        if let Some(pre_run) = &module.pre_run {
            overrides.extend(resolve_env(&pre_run.env, &ctx.secrets)?);
        }
        let blocklist_file = dir.join(BLOCKLIST_FILE);

        let mut env = ctx.env.with_overrides(&overrides);
        env.set(env::MODULE_PATH, relative);
        env.set(env::SUBMODULE_NAME, &module.name);
        env.set(env::BLOCKLISTED_TESTS_FILE, blocklist_file.to_string_lossy());

        Ok(ModuleUnit {
            module: module.clone(),
            dir,
            env,
            blocklist_file,
        })
    }

    async fn run_top_level_pre_run(
        &self,
        ctx: &TaskContext,
        merge: &MergeV2,
        pre_run: &Run,
        output: &mut LogBuffer,
    ) -> Result<(), NucleusError> {
        debug!("Running pre-run on top level");
        output.write_line(TOP_LEVEL_PRE_RUN);
        let env = ctx.env.with_overrides(&resolve_env(&merge.env, &ctx.secrets)?);
        self.collab
            .executor
            .execute_user_commands(
                CommandType::PreRun,
                pre_run,
                &ctx.secrets,
                &env,
                &self.settings.layout.repo_dir(),
                output,
            )
            .await
            .map_err(|e| {
                error!("Error occurred running top level pre-run: {:#}", e);
                NucleusError::failed(PRE_RUN_FAILED)
            })
    }

    /// Prepares every submodule concurrently; the first failure in declaration order wins
    async fn pre_run_phase(
        &self,
        ctx: &TaskContext,
        units: &[ModuleUnit],
        output: &mut LogBuffer,
    ) -> Result<(), NucleusError> {
        let executor = self.collab.executor.clone();
        let blocklist = self.collab.blocklist.clone();
        let payload = ctx.payload.clone();
        let secrets = ctx.secrets.clone();

        let results = fan_out(units.to_vec(), self.settings.max_parallel_submodules, |unit| {
            let executor = executor.clone();
            let blocklist = blocklist.clone();
            let payload = payload.clone();
            let secrets = secrets.clone();
            async move {
                let mut buffer = LogBuffer::with_header(format!(
                    "<------ PRE RUN for submodule {}  ------> ",
                    unit.module.name
                ));
                let result = prepare_module(
                    executor.as_ref(),
                    blocklist.as_ref(),
                    &payload,
                    &secrets,
                    &unit,
                    &mut buffer,
                )
                .await;
                (buffer, result)
            }
        })
        .await;

        let outcomes = join_buffers(results, output);
        first_error("pre-run", &module_names(units), outcomes).map(|_| ())
    }

    /// Discovers and reports every submodule concurrently
    async fn discovery_phase(
        &self,
        ctx: &TaskContext,
        config: &TasConfigV2,
        units: &[ModuleUnit],
        setup: &SetUpResult,
        output: &mut LogBuffer,
    ) -> Result<(), NucleusError> {
        let repo_dir = self.settings.layout.repo_dir();
        let payload = &ctx.payload;
        let requests: Vec<DiscoveryArgs> = units
            .iter()
            .map(|unit| DiscoveryArgs {
                payload: payload.clone(),
                framework: unit.module.framework,
                framework_version: unit.module.framework_version,
                patterns: unit.module.patterns.clone(),
                env: unit.env.clone(),
                secrets: ctx.secrets.clone(),
                config_file: unit.module.config_file.clone(),
                smart_run: config.smart_run,
                package_json_impacts_all: false,
                diff: rebase_diff(&setup.diff, &unit.module.path),
                diff_exists: setup.diff_exists,
                tas_file_name: relative_tas_file(&self.tas_path, &repo_dir),
                cwd: unit.dir.clone(),
                meta: DiscoveryMeta {
                    sub_module: unit.module.name.clone(),
                    parallelism: unit.module.parallelism,
                    split_mode: config.split_mode,
                    tier: config.tier.unwrap_or(payload.license_tier),
                    container_image: config.container_image.clone(),
                },
            })
            .collect();

        let discovery = self.collab.discovery.clone();
        let results = fan_out(requests, self.settings.max_parallel_submodules, |args| {
            let discovery = discovery.clone();
            async move {
                let mut buffer = LogBuffer::with_header(format!(
                    "<------ DISCOVERY for submodule {}  ------> ",
                    args.meta.sub_module
                ));
                let result = discover_module(discovery.as_ref(), args, &mut buffer).await;
                (buffer, result)
            }
        })
        .await;

        let outcomes = join_buffers(results, output);
        first_error("discovery", &module_names(units), outcomes).map(|_| ())
    }
}

fn active_merge(config: &TasConfigV2, payload: &Payload) -> Result<MergeV2, NucleusError> {
    config
        .merge_for(payload.event_type)
        .cloned()
        .ok_or_else(|| {
            NucleusError::failed(format!(
                "no submodules configured for {} events",
                payload.event_type
            ))
        })
}

fn module_names(units: &[ModuleUnit]) -> Vec<String> {
    units.iter().map(|u| u.module.name.clone()).collect()
}

/// Appends task buffers to `output` in input order and returns the task outcomes
fn join_buffers(
    results: Vec<Result<(LogBuffer, Result<(), NucleusError>), NucleusError>>,
    output: &mut LogBuffer,
) -> Vec<Result<(), NucleusError>> {
    results
        .into_iter()
        .map(|result| {
            let (buffer, outcome) = result?;
            output.append(buffer);
            outcome
        })
        .collect()
}

async fn prepare_module(
    executor: &dyn ExecutionManager,
    blocklist: &dyn BlocklistService,
    payload: &Payload,
    secrets: &Secrets,
    unit: &ModuleUnit,
    output: &mut LogBuffer,
) -> Result<(), NucleusError> {
    if let Some(pre_run) = &unit.module.pre_run {
        info!("Running pre-run steps for submodule {}", unit.module.name);
        executor
            .execute_user_commands(
                CommandType::PreRun,
                pre_run,
                secrets,
                &unit.env,
                &unit.dir,
                output,
            )
            .await
            .map_err(|e| {
                error!("Unable to run pre-run steps for {}: {:#}", unit.module.name, e);
                NucleusError::failed(PRE_RUN_FAILED)
            })?;
    }

    debug!("Installing runners at path {}", unit.dir.display());
    install_runners(executor, &unit.dir, &unit.env).await?;
    fetch_blocklist(blocklist, payload, &unit.module.blocklist, &unit.blocklist_file).await
}

async fn discover_module(
    discovery: &dyn TestDiscoveryService,
    args: DiscoveryArgs,
    output: &mut LogBuffer,
) -> Result<(), NucleusError> {
    let name = args.meta.sub_module.clone();
    let result = discovery.discover(args, output).await.map_err(|e| {
        error!("Unable to perform test discovery for {}: {:#}", name, e);
        NucleusError::failed(DISCOVERY_FAILED)
    })?;
    discovery.send_result(&result).await.map_err(|e| {
        error!("error while sending discovery result for {}: {:#}", name, e);
        NucleusError::Generic
    })
}

#[async_trait]
impl Driver for DriverV2 {
    async fn run_discovery(
        &self,
        ctx: &mut TaskContext,
        status: &mut TaskPayload,
    ) -> Result<(), NucleusError> {
        debug!("Running with configuration version 2");
        let config = self.load(&ctx.payload).await?;
        let payload = ctx.payload.clone();
        let merge = active_merge(&config, &payload)?;

        let cache = resolve_cache(config.cache.as_ref(), &self.settings.layout.repo_dir())
            .await
            .map_err(|e| {
                error!("Error while computing cache key: {:#}", e);
                NucleusError::Generic
            })?;
        let setup = set_up(
            self.collab.cache.as_ref(),
            self.collab.diff.as_ref(),
            &payload,
            &ctx.oauth,
            Some(cache.key.clone()),
        )
        .await?;

        send_submodule_count(&self.collab, &payload.build_id, merge.sub_modules.len()).await?;

        if let Some(version) = config.node_version.as_deref().filter(|v| !v.is_empty()) {
            self.node.install(version, &mut ctx.env).await?;
        }

        let ctx: &TaskContext = ctx;
        let mut pre_run_log = LogBuffer::new();
        let prepared = async {
            if let Some(pre_run) = &merge.pre_run {
                self.run_top_level_pre_run(ctx, &merge, pre_run, &mut pre_run_log)
                    .await?;
            }
            let units = merge
                .sub_modules
                .iter()
                .map(|module| self.module_unit(ctx, &merge, module))
                .collect::<Result<Vec<_>, _>>()?;
            self.pre_run_phase(ctx, &units, &mut pre_run_log).await?;
            Ok::<_, NucleusError>(units)
        }
        .await;
        store_log(
            self.collab.logs.as_ref(),
            &payload.task_id,
            PURPOSE_PRE_RUN_LOGS,
            &pre_run_log,
        )
        .await;
        let units = prepared?;

        debug!("Caching workspace");
        if let Err(e) = self.collab.cache.cache_workspace("").await {
            error!("Error caching workspace: {:#}", e);
            return Err(NucleusError::Generic);
        }

        let mut discovery_log = LogBuffer::new();
        let discovered = self
            .discovery_phase(ctx, &config, &units, &setup, &mut discovery_log)
            .await;
        store_log(
            self.collab.logs.as_ref(),
            &payload.task_id,
            PURPOSE_DISCOVERY_LOGS,
            &discovery_log,
        )
        .await;
        discovered?;

        if let Err(e) = self.collab.cache.upload(&setup.cache_key, &cache.paths).await {
            warn!("Unable to upload cache: {:#}", e);
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
        let merge = active_merge(&config, &payload)?;

        let name = ctx.env.get(env::SUBMODULE_NAME).unwrap_or_default().to_string();
        let Some(module) = merge.sub_modules.iter().find(|m| m.name == name).cloned() else {
            error!("Error finding submodule {} in configuration file", name);
            return Err(NucleusError::SubModuleNotFound(name));
        };

        let unit = self.module_unit(ctx, &merge, &module)?;
        fetch_blocklist(
            self.collab.blocklist.as_ref(),
            &payload,
            &module.blocklist,
            &unit.blocklist_file,
        )
        .await?;

        let unit = match &module.pre_run {
            Some(pre_run) if module.run_prerun_every_time => {
                if let Some(version) = config.node_version.as_deref().filter(|v| !v.is_empty()) {
                    self.node.install(version, &mut ctx.env).await?;
                }
                // node install changed PATH
                let unit = self.module_unit(ctx, &merge, &module)?;

                info!("Running pre-run steps for submodule {}", module.name);
                let mut output = LogBuffer::new();
                let result = self
                    .collab
                    .executor
                    .execute_user_commands(
                        CommandType::PreRun,
                        pre_run,
                        &ctx.secrets,
                        &unit.env,
                        &unit.dir,
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
                install_runners(self.collab.executor.as_ref(), &unit.dir, &unit.env).await?;
                unit
            }
            _ => unit,
        };

        let args = ExecutionArgs {
            payload: payload.clone(),
            framework: module.framework,
            framework_version: module.framework_version,
            patterns: module.patterns.clone(),
            env: unit.env.clone(),
            secrets: ctx.secrets.clone(),
            config_file: module.config_file.clone(),
            cwd: unit.dir.clone(),
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

        if let Some(post_run) = &module.post_run {
            info!("Running post-run steps");
            let mut output = LogBuffer::new();
            let result = self
                .collab
                .executor
                .execute_user_commands(
                    CommandType::PostRun,
                    post_run,
                    &ctx.secrets,
                    &unit.env,
                    &unit.dir,
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
