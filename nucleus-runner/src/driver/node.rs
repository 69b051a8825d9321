//! Node.js runtime installation through nvm

use std::sync::Arc;
use tracing::{error, info};

use crate::env::TaskEnv;
use crate::error::NucleusError;
use crate::layout::WorkspaceLayout;
use crate::service::{CommandType, ExecutionManager, shell_quote};

pub struct NodeInstaller {
    executor: Arc<dyn ExecutionManager>,
    layout: WorkspaceLayout,
}

impl NodeInstaller {
    pub fn new(executor: Arc<dyn ExecutionManager>, layout: WorkspaceLayout) -> Self {
        Self { executor, layout }
    }

    /// Installs `version` and puts its binaries first on the task's `PATH`
    pub async fn install(&self, version: &str, env: &mut TaskEnv) -> Result<(), NucleusError> {
        info!("Using user-defined node version: {}", version);
        // sourcing nvm and installing must share one shell
        let command = format!(
            "source {} && nvm install {}",
            shell_quote(&self.layout.nvm_script().to_string_lossy()),
            shell_quote(version)
        );

        if let Err(e) = self
            .executor
            .execute_internal_commands(
                CommandType::InstallNodeVersion,
                &[command],
                self.layout.home_dir(),
                env,
            )
            .await
        {
            error!("Unable to install user-defined node version {}: {:#}", version, e);
            return Err(NucleusError::Generic);
        }

        env.prepend_path(&self.layout.node_bin_dir(version));
        Ok(())
    }
}
