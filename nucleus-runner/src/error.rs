//! Task error taxonomy
//!
//! Every driver phase returns a [`NucleusError`]. The pipeline turns it into the
//! terminal status and remark reported to the control plane:
//! - `StatusFailed`: user-facing failure, status `failed`
//! - `Aborted`: cancellation, status `aborted`
//! - everything else: status `error`

use nucleus_core::domain::task::TaskStatus;
use thiserror::Error;

/// Remark used when the underlying error must not reach the user
pub const GENERIC_ERR_REMARK: &str = "Unexpected error";

pub const PRE_RUN_FAILED: &str = "Failed in running pre-run steps";
pub const DISCOVERY_FAILED: &str = "Failed in discovering tests";
pub const EXECUTION_FAILED: &str = "Failed in executing tests.";
pub const POST_RUN_FAILED: &str = "Failed in running post-run steps.";

#[derive(Debug, Error)]
pub enum NucleusError {
    /// A failure the user can act on
    #[error("{remark}")]
    StatusFailed { remark: String },

    #[error("Unexpected error")]
    Generic,

    #[error("Task aborted")]
    Aborted,

    /// The diff between base and target could not be computed
    #[error("diff not found")]
    DiffNotFound,

    #[error("submodule {0} not found")]
    SubModuleNotFound(String),

    #[error("invalid version ( {0} )  mentioned in yml file")]
    InvalidVersion(i64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl NucleusError {
    pub fn failed(remark: impl Into<String>) -> Self {
        Self::StatusFailed {
            remark: remark.into(),
        }
    }

    /// Terminal task status this error maps to
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::StatusFailed { .. } => TaskStatus::Failed,
            Self::Aborted => TaskStatus::Aborted,
            _ => TaskStatus::Error,
        }
    }

    /// Remark reported alongside the terminal status
    pub fn remark(&self) -> String {
        self.to_string()
    }
}
