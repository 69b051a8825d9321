//! Parallel discovery setup
//!
//! Downloads the dependency cache and computes the changed files concurrently.

use nucleus_core::domain::diff::Diff;
use nucleus_core::domain::payload::{Oauth, Payload};
use tracing::{error, info};

use crate::error::NucleusError;
use crate::service::{CacheStore, DiffManager};

/// Outcome of the setup step, consumed by discovery
#[derive(Debug, Clone, Default)]
pub struct SetUpResult {
    pub diff_exists: bool,
    pub diff: Diff,
    pub cache_key: String,
}

/// Runs cache download (when a key is given) alongside diff computation
///
/// A missing diff is not an error. Any other failure cancels the sibling.
pub async fn set_up(
    cache: &dyn CacheStore,
    diff_manager: &dyn DiffManager,
    payload: &Payload,
    oauth: &Oauth,
    cache_key: Option<String>,
) -> Result<SetUpResult, NucleusError> {
    let download = async {
        let Some(key) = cache_key.as_deref() else {
            return Ok(());
        };
        cache.download(key).await.map_err(|e| {
            error!("Unable to download cache: {:#}", e);
            NucleusError::Generic
        })
    };

    let changed_files = async {
        info!("Identifying changed files ...");
        match diff_manager.get_changed_files(payload, oauth).await {
            Ok(diff) => Ok((true, diff)),
            Err(NucleusError::DiffNotFound) => Ok((false, Diff::new())),
            Err(e) => {
                error!("Unable to identify changed files: {:#}", e);
                Err(NucleusError::Other(anyhow::anyhow!(
                    "Error occurred in fetching diff from GitHub"
                )))
            }
        }
    };

    let ((), (diff_exists, diff)) = tokio::try_join!(download, changed_files)?;

    Ok(SetUpResult {
        diff_exists,
        diff,
        cache_key: cache_key.unwrap_or_default(),
    })
}
