//! Task pipeline
//!
//! Owns the lifecycle of one task:
//! - fetch and validate the payload, applying command-line overrides
//! - report `running`, prepare credentials and the checkout
//! - hand the task to the driver matching the configuration version
//! - classify the outcome and report exactly one terminal status
//!
//! The pipeline is the only writer of the task status. Cancellation, driver
//! errors and panics all end in the same terminal report.

use anyhow::Context;
use futures::FutureExt;
use nucleus_core::domain::payload::{Oauth, Payload};
use nucleus_core::domain::task::{TaskPayload, TaskStatus, TaskType};
use nucleus_core::dto::OauthRefreshRequest;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, TaskOverrides};
use crate::context::TaskContext;
use crate::driver::{Builder, Collaborators, DriverSettings};
use crate::env::{self, TaskEnv};
use crate::error::NucleusError;
use crate::service::{CoverageService, GitManager, PayloadManager, SecretParser};

/// Services only the pipeline talks to
#[derive(Clone)]
pub struct PipelineServices {
    pub payloads: Arc<dyn PayloadManager>,
    pub secrets: Arc<dyn SecretParser>,
    pub git: Arc<dyn GitManager>,
    pub coverage: Arc<dyn CoverageService>,
}

pub struct Pipeline {
    config: Config,
    collab: Collaborators,
    services: PipelineServices,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: Config,
        collab: Collaborators,
        services: PipelineServices,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            collab,
            services,
            cancel,
        }
    }

    /// Runs the task to completion
    ///
    /// Returns the terminal status that was reported, or `None` in coverage mode.
    /// Errors are returned only when no task could be identified.
    pub async fn start(&self) -> anyhow::Result<Option<TaskPayload>> {
        let address = self
            .config
            .payload_address
            .as_deref()
            .context("payload address cannot be empty")?;
        let mut payload = self
            .services
            .payloads
            .fetch_payload(address)
            .await
            .context("Unable to fetch payload")?;
        apply_overrides(&mut payload, &self.config.overrides);
        self.services
            .payloads
            .validate_payload(&payload)
            .context("Invalid payload")?;

        if self.config.coverage_mode {
            info!("Merging coverage for build {}", payload.build_id);
            self.services
                .coverage
                .merge_and_upload(&payload)
                .await
                .context("Unable to merge and upload coverage")?;
            return Ok(None);
        }

        let task_type = self.config.task_type.context("task type not set")?;
        let payload = Arc::new(payload);
        let mut status = TaskPayload::running(&payload, task_type);
        info!(
            "Starting {} task {} for build {}",
            task_type, status.task_id, status.build_id
        );

        let running = {
            let tasks = self.collab.tasks.clone();
            let snapshot = status.clone();
            tokio::spawn(async move {
                if let Err(e) = tasks.update_status(&snapshot).await {
                    warn!("Unable to report running status: {:#}", e);
                }
            })
        };

        let outcome = {
            let task = AssertUnwindSafe(self.run(payload, task_type, &mut status)).catch_unwind();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!("Task cancelled");
                    Err(NucleusError::Aborted)
                }
                result = task => match result {
                    Ok(result) => result,
                    Err(_) => {
                        error!("Task panicked");
                        Err(NucleusError::Generic)
                    }
                },
            }
        };

        match outcome {
            Ok(()) => {
                let final_status = if status.is_terminal() {
                    status.status
                } else {
                    TaskStatus::Passed
                };
                let remark = std::mem::take(&mut status.remark);
                status.finish(final_status, remark);
            }
            Err(e) => {
                error!("Task {} failed: {:#}", status.task_id, e);
                status.finish(e.status(), e.remark());
            }
        }

        if let Err(e) = running.await {
            warn!("Running status report did not complete: {}", e);
        }
        if let Err(e) = self.collab.tasks.update_status(&status).await {
            error!("Unable to report final status: {:#}", e);
        }
        info!("Task {} finished with status {}", status.task_id, status.status);
        Ok(Some(status))
    }

    async fn run(
        &self,
        payload: Arc<Payload>,
        task_type: TaskType,
        status: &mut TaskPayload,
    ) -> Result<(), NucleusError> {
        let layout = &self.config.layout;
        let repo_dir = layout.repo_dir();

        let oauth = self.oauth(&payload).await?;
        let secrets = self
            .services
            .secrets
            .get_repo_secrets(&layout.repo_secret_path())
            .await
            .map_err(|e| {
                error!("Unable to read repo secrets: {:#}", e);
                NucleusError::Generic
            })?;

        if self.config.local {
            debug!("Using local checkout at {}", repo_dir.display());
        } else {
            match task_type {
                TaskType::Discovery | TaskType::Flaky => {
                    info!("Cloning {}", payload.repo_link);
                    if let Err(e) = self.services.git.clone_repo(&payload, &oauth).await {
                        error!("Unable to clone repo: {:#}", e);
                        return Err(NucleusError::Other(anyhow::anyhow!(
                            "Unable to clone repo: {}",
                            payload.repo_link
                        )));
                    }
                }
                TaskType::Execution => {
                    debug!("Extracting cached workspace");
                    if let Err(e) = self.collab.cache.extract_workspace("").await {
                        error!("Unable to extract workspace: {:#}", e);
                        return Err(NucleusError::Generic);
                    }
                }
            }
        }

        let coverage_dir = if payload.collect_coverage {
            let dir = layout.commit_coverage_dir(
                &payload.org_id,
                &payload.repo_id,
                &payload.build_target_commit,
            );
            tokio::fs::create_dir_all(&dir).await.map_err(|e| {
                error!("Unable to create coverage dir {}: {}", dir.display(), e);
                NucleusError::Generic
            })?;
            dir
        } else {
            PathBuf::new()
        };

        let mut task_env = TaskEnv::for_task(
            &payload,
            &coverage_dir,
            &repo_dir,
            &self.config.env,
            &self.config.intake_url(),
        );
        if let Some(submodule) = &self.config.overrides.submodule {
            task_env.set(env::SUBMODULE_NAME, submodule);
        }

        let tas_path = self
            .collab
            .tas_config
            .get_tas_config_file_path(&payload)
            .await
            .map_err(|e| NucleusError::failed(e.to_string()))?;
        let version = self
            .collab
            .tas_config
            .get_version(&tas_path)
            .await
            .map_err(|e| NucleusError::failed(e.to_string()))?;
        info!("Configuration {} uses version {}", tas_path.display(), version);

        let settings = DriverSettings {
            layout: layout.clone(),
            max_parallel_submodules: self.config.max_parallel_submodules,
            consecutive_runs: self.config.consecutive_runs,
        };
        let driver = Builder::new(self.collab.clone(), settings).get_driver(version, tas_path)?;

        let mut ctx = TaskContext::new(
            payload,
            Arc::new(oauth),
            coverage_dir,
            Arc::new(secrets),
            task_env,
        );
        match task_type {
            TaskType::Discovery => driver.run_discovery(&mut ctx, status).await,
            TaskType::Execution | TaskType::Flaky => driver.run_execution(&mut ctx, status).await,
        }
    }

    /// Reads the git provider token, refreshing it once it has expired
    async fn oauth(&self, payload: &Payload) -> Result<Oauth, NucleusError> {
        let oauth = self
            .services
            .secrets
            .get_oauth_secret(&self.config.layout.oauth_secret_path())
            .await
            .map_err(|e| {
                error!("Unable to read oauth secret: {:#}", e);
                NucleusError::Generic
            })?;
        if !oauth.is_expired(chrono::Utc::now()) || oauth.refresh_token.is_empty() {
            return Ok(oauth);
        }

        info!("Refreshing expired oauth token");
        let request = OauthRefreshRequest {
            org_id: payload.org_id.clone(),
            git_provider: payload.git_provider.clone(),
            refresh_token: oauth.refresh_token.clone(),
        };
        self.collab.tasks.refresh_oauth(&request).await.map_err(|e| {
            error!("Unable to refresh oauth token: {:#}", e);
            NucleusError::Generic
        })
    }
}

fn apply_overrides(payload: &mut Payload, overrides: &TaskOverrides) {
    replace(&mut payload.task_id, &overrides.task_id);
    replace(&mut payload.build_id, &overrides.build_id);
    replace(&mut payload.build_target_commit, &overrides.target_commit);
    replace(&mut payload.build_base_commit, &overrides.base_commit);
    replace(&mut payload.locators, &overrides.locators);
    replace(&mut payload.locator_address, &overrides.locator_address);
}

fn replace(field: &mut String, value: &Option<String>) {
    if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
        *field = value.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, V1_YAML, V2_YAML};

    fn terminal_reports(harness: &Harness) -> Vec<TaskPayload> {
        harness
            .tasks
            .statuses()
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect()
    }

    #[tokio::test]
    async fn test_discovery_reports_running_then_passed() {
        let harness = Harness::new();
        harness.write_config(V1_YAML);
        let pipeline = harness.pipeline(&["--discover"]);

        let status = pipeline.start().await.unwrap().unwrap();

        assert_eq!(status.status, TaskStatus::Passed);
        assert!(status.end_time.is_some());
        let statuses = harness.tasks.statuses();
        assert_eq!(statuses.first().map(|s| s.status), Some(TaskStatus::Running));
        assert_eq!(statuses.last().map(|s| s.status), Some(TaskStatus::Passed));
        assert_eq!(terminal_reports(&harness).len(), 1);
        assert!(harness.recorder.contains("clone"));
    }

    #[tokio::test]
    async fn test_panic_becomes_single_error_report() {
        let harness = Harness::new();
        harness.write_config(V1_YAML);
        harness.discovery.panic_on_discover();
        let pipeline = harness.pipeline(&["--discover"]);

        let status = pipeline.start().await.unwrap().unwrap();

        assert_eq!(status.status, TaskStatus::Error);
        assert_eq!(status.remark, "Unexpected error");
        assert!(status.end_time.is_some());
        let terminal = terminal_reports(&harness);
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].status, TaskStatus::Error);
    }

    #[tokio::test]
    async fn test_cancelled_task_is_aborted() {
        let harness = Harness::new();
        harness.write_config(V1_YAML);
        let pipeline = harness.pipeline(&["--discover"]);
        harness.cancel.cancel();

        let status = pipeline.start().await.unwrap().unwrap();

        assert_eq!(status.status, TaskStatus::Aborted);
        assert_eq!(status.remark, "Task aborted");
        assert!(harness.discovery.seen().is_empty());
        assert_eq!(terminal_reports(&harness).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_version_is_error() {
        let harness = Harness::new();
        harness.write_config("version: 3\nframework: jest\n");
        let pipeline = harness.pipeline(&["--discover"]);

        let status = pipeline.start().await.unwrap().unwrap();

        assert_eq!(status.status, TaskStatus::Error);
        assert_eq!(status.remark, "invalid version ( 3 )  mentioned in yml file");
    }

    #[tokio::test]
    async fn test_clone_failure_names_repo() {
        let harness = Harness::new();
        harness.write_config(V1_YAML);
        harness.git.fail_clone();
        let pipeline = harness.pipeline(&["--discover"]);

        let status = pipeline.start().await.unwrap().unwrap();

        assert_eq!(status.status, TaskStatus::Error);
        assert_eq!(
            status.remark,
            "Unable to clone repo: https://github.com/acme/app"
        );
    }

    #[tokio::test]
    async fn test_execution_extracts_workspace_instead_of_cloning() {
        let harness = Harness::new();
        harness.write_config(V1_YAML);
        let pipeline = harness.pipeline(&["--execute"]);

        let status = pipeline.start().await.unwrap().unwrap();

        assert_eq!(status.status, TaskStatus::Passed);
        assert!(harness.recorder.contains("extract_workspace:"));
        assert!(!harness.recorder.contains("clone"));
    }

    #[tokio::test]
    async fn test_submodule_flag_selects_module() {
        let harness = Harness::new();
        harness.write_config(V2_YAML);
        let pipeline = harness.pipeline(&["--execute", "--submodule", "a"]);

        let status = pipeline.start().await.unwrap().unwrap();

        assert_eq!(status.status, TaskStatus::Passed);
        let seen = harness.execution.seen();
        assert_eq!(seen[0].cwd, harness.layout.repo_dir().join("pkg/a"));
    }

    #[tokio::test]
    async fn test_overrides_replace_payload_fields() {
        let harness = Harness::new();
        harness.write_config(V1_YAML);
        let pipeline = harness.pipeline(&["--discover", "--task-id", "override-task", "--local"]);

        let status = pipeline.start().await.unwrap().unwrap();

        assert_eq!(status.task_id, "override-task");
        assert!(!harness.recorder.contains("clone"));
        assert_eq!(harness.discovery.seen()[0].payload.task_id, "override-task");
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let harness = Harness::new();
        harness.write_config(V1_YAML);
        harness.secrets.expire_token();
        let pipeline = harness.pipeline(&["--discover"]);

        pipeline.start().await.unwrap().unwrap();
        assert!(harness.recorder.contains("refresh_oauth"));
    }

    #[tokio::test]
    async fn test_coverage_mode_reports_no_status() {
        let harness = Harness::new();
        let pipeline = harness.pipeline(&["--coverage"]);

        assert!(pipeline.start().await.unwrap().is_none());
        assert!(harness.recorder.contains("coverage"));
        assert!(harness.tasks.statuses().is_empty());
    }

    #[test]
    fn test_empty_override_keeps_payload_value() {
        let mut payload: Payload = serde_json::from_value(serde_json::json!({
            "task_id": "t1",
            "build_id": "b1",
            "event_type": "push",
        }))
        .unwrap();
        let overrides = TaskOverrides {
            task_id: Some(String::new()),
            build_id: Some("b2".to_string()),
            ..Default::default()
        };
        apply_overrides(&mut payload, &overrides);
        assert_eq!(payload.task_id, "t1");
        assert_eq!(payload.build_id, "b2");
    }
}
