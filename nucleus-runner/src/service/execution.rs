//! Command execution
//!
//! Runs user-declared commands (pre-run, post-run) and internal commands (runner
//! installation, archives, runtime installation) through `bash -c`, and spawns
//! framework runner programs.
//!
//! Every subprocess gets:
//! - the runner's own environment plus the task environment
//! - the command-specific environment, with secrets substituted
//! - `kill_on_drop`, so cancelling the awaiting future kills the child

use anyhow::{Context, Result};
use async_trait::async_trait;
use nucleus_core::domain::tas::Run;
use std::fmt;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, error};

use crate::env::TaskEnv;
use crate::service::log_buffer::LogBuffer;
use crate::service::secrets::{Secrets, mask_secrets, substitute_env, substitute_secrets};

/// Kind of command being run, used in logs and error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    PreRun,
    PostRun,
    InstallRunners,
    InstallNodeVersion,
    Discovery,
    Execution,
    Archive,
    CoverageMerge,
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandType::PreRun => "prerun",
            CommandType::PostRun => "postrun",
            CommandType::InstallRunners => "installrunners",
            CommandType::InstallNodeVersion => "installnodeversion",
            CommandType::Discovery => "discovery",
            CommandType::Execution => "execution",
            CommandType::Archive => "archive",
            CommandType::CoverageMerge => "coveragemerge",
        };
        write!(f, "{}", name)
    }
}

/// Command used to unpack the internal framework runners into a module
pub const INSTALL_RUNNERS_COMMAND: &str = "tar -xzf /custom-runners/custom-runners.tgz";

/// Quotes a value for safe interpolation into a `bash -c` command line
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[async_trait]
pub trait ExecutionManager: Send + Sync {
    /// Runs user-declared commands in order, stopping at the first failure
    ///
    /// Output, with secrets masked, is appended to `output` even when a command fails.
    async fn execute_user_commands(
        &self,
        kind: CommandType,
        run: &Run,
        secrets: &Secrets,
        env: &TaskEnv,
        cwd: &Path,
        output: &mut LogBuffer,
    ) -> Result<()>;

    /// Runs commands issued by the runner itself
    async fn execute_internal_commands(
        &self,
        kind: CommandType,
        commands: &[String],
        cwd: &Path,
        env: &TaskEnv,
    ) -> Result<()>;

    /// Spawns a program with arguments and waits for it to exit
    async fn run_program(
        &self,
        kind: CommandType,
        program: &str,
        args: &[String],
        cwd: &Path,
        env: &TaskEnv,
        secrets: &Secrets,
        output: &mut LogBuffer,
    ) -> Result<()>;
}

/// Runs commands as local child processes
pub struct ShellExecutionManager;

impl ShellExecutionManager {
    fn command(program: &str, cwd: &Path, env: &TaskEnv) -> Command {
        let mut cmd = Command::new(program);
        cmd.current_dir(cwd)
            .envs(env.iter())
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    fn capture(output: &Output, secrets: &Secrets, buffer: &mut LogBuffer) {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.is_empty() {
            buffer.write(mask_secrets(&stdout, secrets));
        }
        if !stderr.is_empty() {
            buffer.write(mask_secrets(&stderr, secrets));
        }
    }
}

#[async_trait]
impl ExecutionManager for ShellExecutionManager {
    async fn execute_user_commands(
        &self,
        kind: CommandType,
        run: &Run,
        secrets: &Secrets,
        env: &TaskEnv,
        cwd: &Path,
        output: &mut LogBuffer,
    ) -> Result<()> {
        let run_env = substitute_env(&run.env, secrets)
            .with_context(|| format!("failed to resolve {} environment", kind))?;
        let env = env.with_overrides(&run_env);

        for command in &run.commands {
            let resolved = substitute_secrets(command, secrets)?;
            let shown = mask_secrets(&resolved, secrets);
            debug!("Running {} command: {}", kind, shown);
            output.write_line(format!("$ {}", shown));

            let result = Self::command("bash", cwd, &env)
                .arg("-c")
                .arg(&resolved)
                .output()
                .await
                .with_context(|| format!("failed to spawn {} command", kind))?;

            Self::capture(&result, secrets, output);

            if !result.status.success() {
                error!(
                    "command {} of type {} failed with {}",
                    shown, kind, result.status
                );
                anyhow::bail!("command of type {} failed with {}", kind, result.status);
            }
        }

        Ok(())
    }

    async fn execute_internal_commands(
        &self,
        kind: CommandType,
        commands: &[String],
        cwd: &Path,
        env: &TaskEnv,
    ) -> Result<()> {
        for command in commands {
            debug!("Running internal {} command: {}", kind, command);
            let result = Self::command("bash", cwd, env)
                .arg("-c")
                .arg(command)
                .output()
                .await
                .with_context(|| format!("failed to spawn {} command", kind))?;

            if !result.status.success() {
                let stderr = String::from_utf8_lossy(&result.stderr);
                anyhow::bail!(
                    "command {} of type {} failed with {}: {}",
                    command,
                    kind,
                    result.status,
                    stderr.trim()
                );
            }
        }

        Ok(())
    }

    async fn run_program(
        &self,
        kind: CommandType,
        program: &str,
        args: &[String],
        cwd: &Path,
        env: &TaskEnv,
        secrets: &Secrets,
        output: &mut LogBuffer,
    ) -> Result<()> {
        debug!("Running {} program: {} {}", kind, program, args.join(" "));
        let result = Self::command(program, cwd, env)
            .args(args)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", program))?;

        Self::capture(&result, secrets, output);

        if !result.status.success() {
            anyhow::bail!("{} of type {} failed with {}", program, kind, result.status);
        }

        Ok(())
    }
}
