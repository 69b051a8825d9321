//! Blocklist service
//!
//! Merges the blocklist declared in the test configuration with the one kept by the
//! control plane and writes it where the framework runners look for it.
//!
//! The file maps each test file to its blocked entries:
//!
//! ```json
//! { "src/a.spec.js": [{ "source": "yml", "locator": "src/a.spec.js##suite##", "status": "blocklisted" }] }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use nucleus_core::domain::payload::Payload;
use nucleus_core::dto::BlocklistedTest;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::repository::BlocklistRepository;

const DELIMITER: &str = "##";
const SOURCE_YML: &str = "yml";
const SOURCE_API: &str = "api";
const STATUS_BLOCKLISTED: &str = "blocklisted";

/// Blocked entries keyed by the test file they belong to
pub type BlocklistFile = BTreeMap<String, Vec<BlocklistedTest>>;

#[async_trait]
pub trait BlocklistService: Send + Sync {
    /// Fetches, merges and writes the blocklist to `dest`
    async fn get_blocked_tests(&self, payload: &Payload, yml: &[String], dest: &Path) -> Result<()>;
}

pub struct StandardBlocklistService {
    repository: Arc<dyn BlocklistRepository>,
}

impl StandardBlocklistService {
    pub fn new(repository: Arc<dyn BlocklistRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl BlocklistService for StandardBlocklistService {
    async fn get_blocked_tests(&self, payload: &Payload, yml: &[String], dest: &Path) -> Result<()> {
        let remote = self
            .repository
            .fetch_blocklist(&payload.repo_id, &payload.branch_name, &payload.build_id)
            .await?;

        let merged = merge_blocklists(yml, remote);
        debug!("Blocked tests: {:?}", merged);

        let body = serde_json::to_vec(&merged).context("Failed to serialize blocklist")?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create blocklist directory")?;
        }
        tokio::fs::write(dest, body)
            .await
            .with_context(|| format!("Failed to write blocklist file {}", dest.display()))?;

        info!("Wrote {} blocked test files to {}", merged.len(), dest.display());
        Ok(())
    }
}

/// Merges configured locators (source `yml`) with remote entries (source `api`)
///
/// Every locator ends with `##`. Entries are grouped by the locator's file part and
/// a locator already present for a file is not repeated.
pub fn merge_blocklists(yml: &[String], remote: Vec<BlocklistedTest>) -> BlocklistFile {
    let configured = yml.iter().map(|locator| BlocklistedTest {
        source: SOURCE_YML.to_string(),
        locator: locator.clone(),
        status: STATUS_BLOCKLISTED.to_string(),
    });
    let remote = remote.into_iter().map(|mut test| {
        test.source = SOURCE_API.to_string();
        test
    });

    let mut file = BlocklistFile::new();
    for mut test in configured.chain(remote) {
        if !test.locator.ends_with(DELIMITER) {
            test.locator.push_str(DELIMITER);
        }
        let key = test
            .locator
            .split(DELIMITER)
            .next()
            .unwrap_or_default()
            .to_string();

        let entries = file.entry(key).or_default();
        if !entries.iter().any(|e| e.locator == test.locator) {
            entries.push(test);
        }
    }
    file
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedBlocklist {
        tests: Vec<BlocklistedTest>,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl BlocklistRepository for FixedBlocklist {
        async fn fetch_blocklist(
            &self,
            repo_id: &str,
            branch: &str,
            build_id: &str,
        ) -> Result<Vec<BlocklistedTest>> {
            self.calls.lock().unwrap().push((
                repo_id.to_string(),
                branch.to_string(),
                build_id.to_string(),
            ));
            Ok(self.tests.clone())
        }
    }

    fn remote(locator: &str, status: &str) -> BlocklistedTest {
        BlocklistedTest {
            source: String::new(),
            locator: locator.to_string(),
            status: status.to_string(),
        }
    }

    #[test]
    fn test_merge_groups_by_file() {
        let yml = vec!["src/a.spec.js##adds".to_string(), "src/b.spec.js".to_string()];
        let merged = merge_blocklists(&yml, vec![remote("src/a.spec.js##subtracts##", "quarantined")]);

        let a = &merged["src/a.spec.js"];
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].locator, "src/a.spec.js##adds##");
        assert_eq!(a[0].source, "yml");
        assert_eq!(a[0].status, "blocklisted");
        assert_eq!(a[1].source, "api");
        assert_eq!(a[1].status, "quarantined");

        assert_eq!(merged["src/b.spec.js"][0].locator, "src/b.spec.js##");
    }

    #[test]
    fn test_merge_skips_duplicates() {
        let yml = vec!["src/a.spec.js##adds##".to_string()];
        let merged = merge_blocklists(&yml, vec![remote("src/a.spec.js##adds", "blocklisted")]);
        assert_eq!(merged["src/a.spec.js"].len(), 1);
        assert_eq!(merged["src/a.spec.js"][0].source, "yml");
    }

    #[tokio::test]
    async fn test_get_blocked_tests_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("module/blocklist.json");
        let repository = Arc::new(FixedBlocklist {
            tests: vec![remote("test/x.js##x##", "blocklisted")],
            calls: Mutex::new(Vec::new()),
        });
        let service = StandardBlocklistService::new(repository.clone());
        let payload: Payload = serde_json::from_value(serde_json::json!({
            "repo_id": "r1",
            "branch_name": "main",
            "build_id": "b1",
            "event_type": "push",
        }))
        .unwrap();

        service.get_blocked_tests(&payload, &[], &dest).await.unwrap();

        let written: BlocklistFile =
            serde_json::from_slice(&std::fs::read(&dest).unwrap()).unwrap();
        assert_eq!(written["test/x.js"][0].locator, "test/x.js##x##");
        assert_eq!(
            repository.calls.lock().unwrap()[0],
            ("r1".to_string(), "main".to_string(), "b1".to_string())
        );
    }
}
