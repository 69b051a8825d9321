//! Runner configuration
//!
//! Command-line flags (with environment fallbacks) are parsed by clap into [`Cli`]
//! and turned into the runtime [`Config`], which is validated before any work starts.

use clap::Parser;
use nucleus_core::domain::task::TaskType;
use std::path::PathBuf;
use std::time::Duration;

use crate::layout::{DEFAULT_HOME_DIR, DEFAULT_SECRETS_DIR, WorkspaceLayout};

#[derive(Debug, Clone, Parser)]
#[command(name = "nucleus")]
#[command(about = "Discovers and executes a repository's tests inside a CI container", long_about = None)]
pub struct Cli {
    /// Where to fetch the task payload from (http(s) URL or local file)
    #[arg(long = "payload-address", env = "PAYLOAD_ADDRESS")]
    pub payload_address: Option<String>,

    /// Port of the local intake server that framework runners post results to
    #[arg(long, env = "NUCLEUS_PORT", default_value_t = 9876)]
    pub port: u16,

    /// Control-plane base URL
    #[arg(
        long = "control-plane-url",
        env = "CONTROL_PLANE_URL",
        default_value = "http://neuron-service.phoenix"
    )]
    pub control_plane_url: String,

    /// Bearer token for control-plane requests
    #[arg(long, env = "TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Merge coverage of the payload's commits and exit
    #[arg(long)]
    pub coverage: bool,

    /// Run test discovery
    #[arg(long)]
    pub discover: bool,

    /// Run test execution
    #[arg(long)]
    pub execute: bool,

    /// Run flaky-test detection (repeated execution)
    #[arg(long)]
    pub flaky: bool,

    /// Number of consecutive executions in flaky mode
    #[arg(long = "consecutive-runs", default_value_t = 1)]
    pub consecutive_runs: u32,

    /// Deployment environment name exported to subprocesses
    #[arg(long, env = "ENV", default_value = "prod")]
    pub env: String,

    #[arg(long = "task-id", env = "TASK_ID")]
    pub task_id: Option<String>,

    /// Test locators to execute, separated by `#TAS#`
    #[arg(long)]
    pub locators: Option<String>,

    #[arg(long = "locator-address")]
    pub locator_address: Option<String>,

    #[arg(long = "build-id")]
    pub build_id: Option<String>,

    #[arg(long = "target-commit")]
    pub target_commit: Option<String>,

    #[arg(long = "base-commit")]
    pub base_commit: Option<String>,

    /// Submodule an execution task runs (multi-module configurations)
    #[arg(long = "submodule", env = "SUBMODULE_NAME")]
    pub submodule: Option<String>,

    /// Use the checkout already present in the repo dir instead of cloning
    #[arg(long)]
    pub local: bool,

    #[arg(long = "home-dir", env = "NUCLEUS_HOME", default_value = DEFAULT_HOME_DIR)]
    pub home_dir: PathBuf,

    #[arg(long = "secrets-dir", default_value = DEFAULT_SECRETS_DIR)]
    pub secrets_dir: PathBuf,

    /// Upper bound on submodules processed concurrently
    #[arg(
        long = "max-parallel-submodules",
        env = "MAX_PARALLEL_SUBMODULES",
        default_value_t = 4
    )]
    pub max_parallel_submodules: usize,

    /// Seconds to wait for a framework runner to post its results
    #[arg(long = "result-timeout", default_value_t = 600)]
    pub result_timeout: u64,
}

/// Values that replace payload fields when the task is scheduled directly
#[derive(Debug, Clone, Default)]
pub struct TaskOverrides {
    pub task_id: Option<String>,
    pub build_id: Option<String>,
    pub target_commit: Option<String>,
    pub base_commit: Option<String>,
    pub locators: Option<String>,
    pub locator_address: Option<String>,
    pub submodule: Option<String>,
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// `None` in coverage-only mode
    pub task_type: Option<TaskType>,
    pub coverage_mode: bool,
    pub payload_address: Option<String>,
    pub port: u16,
    pub control_plane_url: String,
    pub token: Option<String>,
    pub env: String,
    pub verbose: bool,
    pub local: bool,
    pub consecutive_runs: u32,
    pub overrides: TaskOverrides,
    pub layout: WorkspaceLayout,
    pub max_parallel_submodules: usize,
    pub result_timeout: Duration,
}

impl Config {
    /// Builds the configuration from parsed flags
    ///
    /// Exactly one of `--discover`, `--execute` and `--flaky` must be given unless
    /// `--coverage` is.
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let selected: Vec<TaskType> = [
            (cli.discover, TaskType::Discovery),
            (cli.execute, TaskType::Execution),
            (cli.flaky, TaskType::Flaky),
        ]
        .into_iter()
        .filter_map(|(set, task_type)| set.then_some(task_type))
        .collect();

        if selected.len() > 1 {
            anyhow::bail!("only one of --discover, --execute and --flaky may be given");
        }

        Ok(Self {
            task_type: selected.first().copied(),
            coverage_mode: cli.coverage,
            payload_address: cli.payload_address,
            port: cli.port,
            control_plane_url: cli.control_plane_url,
            token: cli.token,
            env: cli.env,
            verbose: cli.verbose,
            local: cli.local,
            consecutive_runs: cli.consecutive_runs,
            overrides: TaskOverrides {
                task_id: cli.task_id,
                build_id: cli.build_id,
                target_commit: cli.target_commit,
                base_commit: cli.base_commit,
                locators: cli.locators,
                locator_address: cli.locator_address,
                submodule: cli.submodule,
            },
            layout: WorkspaceLayout::new(cli.home_dir, cli.secrets_dir),
            max_parallel_submodules: cli.max_parallel_submodules,
            result_timeout: Duration::from_secs(cli.result_timeout),
        })
    }

    /// Base URL of the local intake server
    pub fn intake_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.task_type.is_none() && !self.coverage_mode {
            anyhow::bail!("one of --discover, --execute, --flaky or --coverage is required");
        }

        match &self.payload_address {
            Some(address) if !address.is_empty() => {}
            _ => anyhow::bail!("payload address cannot be empty"),
        }

        if !self.control_plane_url.starts_with("http://")
            && !self.control_plane_url.starts_with("https://")
        {
            anyhow::bail!("control plane url must start with http:// or https://");
        }

        if self.max_parallel_submodules == 0 {
            anyhow::bail!("max_parallel_submodules must be greater than 0");
        }

        if self.consecutive_runs == 0 {
            anyhow::bail!("consecutive_runs must be greater than 0");
        }

        if self.result_timeout.as_secs() == 0 {
            anyhow::bail!("result_timeout must be greater than 0");
        }

        Ok(())
    }
}
