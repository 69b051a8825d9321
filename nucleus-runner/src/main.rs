//! Nucleus Runner
//!
//! Runs one CI test task inside its container.
//!
//! Architecture:
//! - Configuration: command-line flags with environment fallbacks
//! - Repositories: HTTP communication with the control plane (status, results, blocklists)
//! - Services: payloads, secrets, git, caches, command execution, framework runners
//! - Drivers: the discovery and execution lifecycles per configuration version
//! - Pipeline: status reporting, cancellation and error classification
//! - Intake API: local server framework runners post their results to
//!
//! The process exits once the task has reported its terminal status.

mod api;
mod config;
mod context;
mod driver;
mod env;
mod error;
mod layout;
mod pipeline;
mod repository;
mod service;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::ResultBroker;
use crate::config::{Cli, Config};
use crate::driver::Collaborators;
use crate::pipeline::{Pipeline, PipelineServices};
use crate::repository::{
    HttpBlocklistRepository, HttpResultRepository, HttpTaskRepository, ResultRepository,
    TaskRepository,
};
use crate::service::{
    ExecutionManager, FileLogStore, FileSecretParser, GitCliManager, GitDiffManager,
    HttpPayloadManager, LocalCacheStore, RunnerDiscoveryService, RunnerExecutionService,
    ShellExecutionManager, StandardBlocklistService, StandardCoverageService,
    YamlTasConfigManager,
};
use nucleus_client::ControlPlaneClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose {
        "nucleus_runner=debug,tower_http=debug"
    } else {
        "nucleus_runner=info,tower_http=info"
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Nucleus Runner");

    // Load configuration
    let config = Config::from_cli(cli)?;
    config.validate()?;
    info!(
        "Loaded configuration: task_type={:?}, coverage={}, control_plane_url={}",
        config.task_type, config.coverage_mode, config.control_plane_url
    );

    // Initialize control-plane client
    let mut client = ControlPlaneClient::new(config.control_plane_url.clone());
    if let Some(token) = &config.token {
        client = client.with_token(token.clone());
    }
    let client = Arc::new(client);
    info!("Control-plane client initialized");

    // Initialize repositories
    let tasks: Arc<dyn TaskRepository> = Arc::new(HttpTaskRepository::new(client.clone()));
    let results: Arc<dyn ResultRepository> = Arc::new(HttpResultRepository::new(client.clone()));
    let blocklists = Arc::new(HttpBlocklistRepository::new(client));

    info!("Repositories initialized");

    // Start the intake server
    let shutdown = CancellationToken::new();
    let broker = Arc::new(ResultBroker::new());
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind intake server to port {}", config.port))?;
    let server = tokio::spawn(api::serve(
        listener,
        api::create_router(broker.clone()),
        shutdown.clone(),
    ));

    // Initialize services
    let layout = config.layout.clone();
    let repo_dir = layout.repo_dir();
    let http = reqwest::Client::new();
    let executor: Arc<dyn ExecutionManager> = Arc::new(ShellExecutionManager);

    let collab = Collaborators {
        tas_config: Arc::new(YamlTasConfigManager::new(repo_dir.clone())),
        executor: executor.clone(),
        cache: Arc::new(LocalCacheStore::new(layout.clone(), executor.clone())),
        diff: Arc::new(GitDiffManager::new(repo_dir.clone())),
        blocklist: Arc::new(StandardBlocklistService::new(blocklists)),
        discovery: Arc::new(RunnerDiscoveryService::new(
            executor.clone(),
            broker.clone(),
            results.clone(),
            config.result_timeout,
        )),
        execution: Arc::new(RunnerExecutionService::new(
            executor.clone(),
            broker,
            results.clone(),
            http.clone(),
            layout.home_dir().to_path_buf(),
            config.result_timeout,
        )),
        tasks,
        logs: Arc::new(FileLogStore::new(layout.logs_dir())),
    };
    let services = PipelineServices {
        payloads: Arc::new(HttpPayloadManager::new(http)),
        secrets: Arc::new(FileSecretParser),
        git: Arc::new(GitCliManager::new(repo_dir)),
        coverage: Arc::new(StandardCoverageService::new(layout, executor, results)),
    };

    info!("Services initialized");

    // Cancel the task on SIGINT or SIGTERM
    let cancel = CancellationToken::new();
    watch_signals(cancel.clone())?;

    let pipeline = Pipeline::new(config, collab, services, cancel);
    let outcome = pipeline.start().await;

    shutdown.cancel();
    match server.await {
        Ok(Err(e)) => warn!("Intake server stopped with error: {:#}", e),
        Err(e) => warn!("Intake server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    match outcome {
        Ok(Some(status)) => {
            info!("Task completed with status {}", status.status);
            Ok(())
        }
        Ok(None) => {
            info!("Coverage merged and uploaded");
            Ok(())
        }
        Err(e) => {
            error!("Pipeline error: {:#}", e);
            Err(e)
        }
    }
}

/// Cancels `cancel` on the first SIGINT or SIGTERM
///
/// The SIGTERM handler is installed before this returns.
fn watch_signals(cancel: CancellationToken) -> Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;

    Ok(tokio::spawn(async move {
        let interrupt = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for interrupt: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = terminate.recv();
        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = interrupt => warn!("Received interrupt, aborting task"),
            _ = terminate => warn!("Received SIGTERM, aborting task"),
        }
        cancel.cancel();
    }))
}
