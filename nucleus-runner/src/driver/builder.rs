//! Driver selection by configuration schema version

use std::path::PathBuf;
use std::sync::Arc;

use crate::driver::{Collaborators, Driver, DriverSettings, DriverV1, DriverV2, NodeInstaller};
use crate::error::NucleusError;

/// Wires collaborators into the driver matching a schema version
pub struct Builder {
    collab: Collaborators,
    settings: DriverSettings,
}

impl Builder {
    pub fn new(collab: Collaborators, settings: DriverSettings) -> Self {
        Self { collab, settings }
    }

    /// Driver for configuration files of `version` found at `path`
    pub fn get_driver(
        &self,
        version: i64,
        path: impl Into<PathBuf>,
    ) -> Result<Arc<dyn Driver>, NucleusError> {
        let node = NodeInstaller::new(self.collab.executor.clone(), self.settings.layout.clone());
        let path = path.into();
        match version {
            1 => Ok(Arc::new(DriverV1::new(
                self.collab.clone(),
                self.settings.clone(),
                node,
                path,
            ))),
            2 => Ok(Arc::new(DriverV2::new(
                self.collab.clone(),
                self.settings.clone(),
                node,
                path,
            ))),
            other => Err(NucleusError::InvalidVersion(other)),
        }
    }
}
