//! Execution context for a single task
//!
//! Contains all state a driver needs while running the task:
//! - The payload identifying the build
//! - Git provider credentials and repository secrets
//! - The coverage directory, when coverage was requested
//! - The explicit environment passed to every subprocess

use nucleus_core::domain::payload::{Oauth, Payload};
use std::path::PathBuf;
use std::sync::Arc;

use crate::env::TaskEnv;
use crate::service::Secrets;

pub struct TaskContext {
    pub payload: Arc<Payload>,
    pub oauth: Arc<Oauth>,
    /// Empty when coverage is not collected
    pub coverage_dir: PathBuf,
    pub secrets: Arc<Secrets>,
    pub env: TaskEnv,
}

impl TaskContext {
    pub fn new(
        payload: Arc<Payload>,
        oauth: Arc<Oauth>,
        coverage_dir: PathBuf,
        secrets: Arc<Secrets>,
        env: TaskEnv,
    ) -> Self {
        Self {
            payload,
            oauth,
            coverage_dir,
            secrets,
            env,
        }
    }
}
