//! Cache-key derivation
//!
//! Without a declared cache block the key is the SHA-256 of the repository's
//! `package.json`, so dependency caches roll over whenever dependencies change.

use anyhow::{Context, Result};
use nucleus_core::domain::tas::Cache;
use sha2::{Digest, Sha256};
use std::path::Path;

const MANIFEST: &str = "package.json";

/// Lower-case hex SHA-256 of the dependency manifest
pub async fn manifest_checksum(repo_dir: &Path) -> Result<String> {
    let path = repo_dir.join(MANIFEST);
    let contents = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Error while computing checksum of {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(&contents)))
}

/// The declared cache, or one keyed by the manifest checksum with default paths
pub async fn resolve_cache(declared: Option<&Cache>, repo_dir: &Path) -> Result<Cache> {
    match declared {
        Some(cache) => Ok(cache.clone()),
        None => Ok(Cache {
            key: manifest_checksum(repo_dir).await?,
            paths: Vec::new(),
            version: String::new(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fallback_key_is_manifest_checksum() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "abc").unwrap();
        let cache = resolve_cache(None, dir.path()).await.unwrap();
        assert_eq!(
            cache.key,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(cache.paths.is_empty());

        let again = resolve_cache(None, dir.path()).await.unwrap();
        assert_eq!(again, cache);
    }

    #[tokio::test]
    async fn test_declared_cache_used_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let declared = Cache {
            key: "deps-{{ checksum }}".to_string(),
            paths: vec!["node_modules".to_string()],
            version: "v2".to_string(),
        };
        let cache = resolve_cache(Some(&declared), dir.path()).await.unwrap();
        assert_eq!(cache, declared);
    }

    #[tokio::test]
    async fn test_missing_manifest_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_cache(None, dir.path()).await.is_err());
    }
}
