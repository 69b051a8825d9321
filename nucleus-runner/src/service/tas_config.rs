//! Test configuration loader
//!
//! Locates the repository's test configuration file, reads its schema version and
//! parses it into the matching [`TasConfig`] variant. Validation errors are written
//! for the user: drivers report them verbatim as the failure remark.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nucleus_core::domain::payload::{EventType, Payload, Tier};
use nucleus_core::domain::tas::{TasConfig, TasConfigV1, TasConfigV2};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = ".tas.yml";
const SUPPORTED_VERSIONS: [i64; 2] = [1, 2];
const VERSION_MISMATCH_REMARK: &str =
    "the yml structure is invalid, please check the TAS yml documentation";

#[async_trait]
pub trait TasConfigManager: Send + Sync {
    /// Parses and validates the configuration for the given event and license tier
    async fn load_and_validate(
        &self,
        version: i64,
        path: &Path,
        event_type: EventType,
        license_tier: Tier,
    ) -> Result<TasConfig>;

    /// Reads the schema version declared by the configuration file
    async fn get_version(&self, path: &Path) -> Result<i64>;

    /// Absolute path of the configuration file named by the payload
    async fn get_tas_config_file_path(&self, payload: &Payload) -> Result<PathBuf>;
}

/// Loads YAML configuration files from the repository checkout
pub struct YamlTasConfigManager {
    repo_dir: PathBuf,
}

impl YamlTasConfigManager {
    pub fn new(repo_dir: PathBuf) -> Self {
        Self { repo_dir }
    }

    async fn read(path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read configuration file {}", path.display()))
    }
}

#[async_trait]
impl TasConfigManager for YamlTasConfigManager {
    async fn load_and_validate(
        &self,
        version: i64,
        path: &Path,
        event_type: EventType,
        license_tier: Tier,
    ) -> Result<TasConfig> {
        let raw = Self::read(path).await?;
        let err = match parse_and_validate(version, &raw, event_type, license_tier) {
            Ok(config) => return Ok(config),
            Err(err) => err,
        };

        // A file written for another schema version gets a pointer to the docs
        let fits_other = SUPPORTED_VERSIONS
            .iter()
            .filter(|&&other| other != version)
            .any(|&other| parse_and_validate(other, &raw, event_type, license_tier).is_ok());
        if fits_other {
            anyhow::bail!(VERSION_MISMATCH_REMARK);
        }
        Err(err)
    }

    async fn get_version(&self, path: &Path) -> Result<i64> {
        let raw = Self::read(path).await?;
        parse_version(&raw)
    }

    async fn get_tas_config_file_path(&self, payload: &Payload) -> Result<PathBuf> {
        let name = if payload.tas_file_name.is_empty() {
            DEFAULT_CONFIG_FILE
        } else {
            payload.tas_file_name.as_str()
        };

        let primary = self.repo_dir.join(name);
        if tokio::fs::try_exists(&primary).await.unwrap_or(false) {
            return Ok(primary);
        }

        // .yml and .yaml are interchangeable
        let alternate = match primary.extension().and_then(|e| e.to_str()) {
            Some("yml") => Some(primary.with_extension("yaml")),
            Some("yaml") => Some(primary.with_extension("yml")),
            _ => None,
        };
        if let Some(alternate) = alternate {
            if tokio::fs::try_exists(&alternate).await.unwrap_or(false) {
                return Ok(alternate);
            }
        }

        anyhow::bail!("configuration file {} not found in repository", name)
    }
}

fn parse_and_validate(
    version: i64,
    raw: &str,
    event_type: EventType,
    license_tier: Tier,
) -> Result<TasConfig> {
    match version {
        1 => {
            let mut config: TasConfigV1 = serde_yaml::from_str(raw)
                .map_err(|e| anyhow::anyhow!("invalid configuration file: {}", e))?;
            validate_v1(&mut config, event_type, license_tier)?;
            Ok(TasConfig::V1(config))
        }
        2 => {
            let mut config: TasConfigV2 = serde_yaml::from_str(raw)
                .map_err(|e| anyhow::anyhow!("invalid configuration file: {}", e))?;
            validate_v2(&mut config, event_type, license_tier)?;
            Ok(TasConfig::V2(config))
        }
        other => anyhow::bail!("invalid version ( {} )  mentioned in yml file", other),
    }
}

/// Extracts the major schema version; a file without `version` is version 1
pub fn parse_version(raw: &str) -> Result<i64> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(raw).map_err(|e| anyhow::anyhow!("invalid configuration file: {}", e))?;

    let Some(version) = doc.get("version") else {
        return Ok(1);
    };

    let parsed = match version {
        serde_yaml::Value::Number(n) => n.as_f64(),
        serde_yaml::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) => Ok(v.trunc() as i64),
        None => anyhow::bail!("version in configuration file must be a number"),
    }
}

fn merge_block_name(event_type: EventType) -> &'static str {
    match event_type {
        EventType::PullRequest => "preMerge",
        EventType::Push => "postMerge",
    }
}

fn resolve_tier(declared: Option<Tier>, license_tier: Tier) -> Result<Tier> {
    let tier = declared.unwrap_or(license_tier);
    if tier > license_tier {
        anyhow::bail!(
            "tier must be less than or equal to license tier {}",
            license_tier
        );
    }
    Ok(tier)
}

/// Checks a V1 configuration and fills in the effective tier
pub fn validate_v1(config: &mut TasConfigV1, event_type: EventType, license_tier: Tier) -> Result<()> {
    let block = merge_block_name(event_type);
    match config.merge_for(event_type) {
        Some(merge) if !merge.patterns.is_empty() => {}
        Some(_) => anyhow::bail!("`{}` must declare at least one pattern", block),
        None => anyhow::bail!("`{}` is not configured in configuration file", block),
    }

    if config.cache.as_ref().is_some_and(|cache| cache.key.is_empty()) {
        anyhow::bail!("`cache.key` is required when `cache` is declared");
    }

    config.tier = Some(resolve_tier(config.tier, license_tier)?);
    Ok(())
}

/// Checks a V2 configuration and fills in the effective tier
pub fn validate_v2(config: &mut TasConfigV2, event_type: EventType, license_tier: Tier) -> Result<()> {
    let block = merge_block_name(event_type);
    let Some(merge) = config.merge_for(event_type) else {
        anyhow::bail!("`{}` is not configured in configuration file", block);
    };

    if merge.sub_modules.is_empty() {
        anyhow::bail!("`{}` must declare at least one submodule", block);
    }

    let mut names = HashSet::new();
    for module in &merge.sub_modules {
        if module.name.trim().is_empty() {
            anyhow::bail!("every submodule in `{}` needs a name", block);
        }
        if !names.insert(module.name.as_str()) {
            anyhow::bail!("duplicate submodule name {} in `{}`", module.name, block);
        }
        if module.patterns.is_empty() {
            anyhow::bail!("submodule {} must declare at least one pattern", module.name);
        }
    }

    if config.cache.as_ref().is_some_and(|cache| cache.key.is_empty()) {
        anyhow::bail!("`cache.key` is required when `cache` is declared");
    }

    config.tier = Some(resolve_tier(config.tier, license_tier)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const V2: &str = r#"
version: 2.0
preMerge:
  subModules:
    - name: a
      path: ./a
      pattern: ["**/*.spec.js"]
      framework: jest
    - name: b
      path: ./b
      pattern: ["**/*.spec.js"]
      framework: mocha
"#;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("framework: jest").unwrap(), 1);
        assert_eq!(parse_version("version: 2").unwrap(), 2);
        assert_eq!(parse_version("version: 2.0").unwrap(), 2);
        assert_eq!(parse_version("version: \"1.0\"").unwrap(), 1);
        assert!(parse_version("version: [1]").is_err());
    }

    #[test]
    fn test_validate_v2_requires_event_block() {
        let mut config: TasConfigV2 = serde_yaml::from_str(V2).unwrap();
        assert!(validate_v2(&mut config, EventType::PullRequest, Tier::Small).is_ok());
        assert_eq!(config.tier, Some(Tier::Small));

        let err = validate_v2(&mut config, EventType::Push, Tier::Small).unwrap_err();
        assert_eq!(
            err.to_string(),
            "`postMerge` is not configured in configuration file"
        );
    }

    #[test]
    fn test_validate_v2_rejects_duplicate_names() {
        let yaml = V2.replace("name: b", "name: a");
        let mut config: TasConfigV2 = serde_yaml::from_str(&yaml).unwrap();
        let err = validate_v2(&mut config, EventType::PullRequest, Tier::Small).unwrap_err();
        assert!(err.to_string().contains("duplicate submodule name a"));
    }

    #[test]
    fn test_validate_v1_tier_limit() {
        let mut config: TasConfigV1 = serde_yaml::from_str(
            "framework: jest\ntier: large\npostMerge:\n  pattern: [\"test/**\"]\n",
        )
        .unwrap();
        assert!(validate_v1(&mut config, EventType::Push, Tier::Small).is_err());
        assert!(validate_v1(&mut config, EventType::Push, Tier::XLarge).is_ok());
        assert_eq!(config.tier, Some(Tier::Large));
    }

    #[tokio::test]
    async fn test_config_file_path_alternate_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".tas.yaml"), "framework: jest").unwrap();
        let manager = YamlTasConfigManager::new(dir.path().to_path_buf());
        let payload: Payload = serde_json::from_value(serde_json::json!({
            "tas_file_name": ".tas.yml",
            "event_type": "push",
        }))
        .unwrap();
        let path = manager.get_tas_config_file_path(&payload).await.unwrap();
        assert_eq!(path, dir.path().join(".tas.yaml"));
    }

    #[tokio::test]
    async fn test_load_v2() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".tas.yml");
        std::fs::write(&path, V2).unwrap();
        let manager = YamlTasConfigManager::new(dir.path().to_path_buf());

        let version = manager.get_version(&path).await.unwrap();
        assert_eq!(version, 2);
        let config = manager
            .load_and_validate(version, &path, EventType::PullRequest, Tier::Medium)
            .await
            .unwrap();
        assert_eq!(config.version(), 2);
    }

    #[tokio::test]
    async fn test_load_reports_version_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".tas.yml");
        std::fs::write(
            &path,
            "version: 2\nframework: jest\npreMerge:\n  pattern: [\"test/**\"]\n",
        )
        .unwrap();
        let manager = YamlTasConfigManager::new(dir.path().to_path_buf());

        let err = manager
            .load_and_validate(2, &path, EventType::PullRequest, Tier::Small)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), VERSION_MISMATCH_REMARK);

        // Fits neither schema for this event: the original error stands
        let err = manager
            .load_and_validate(2, &path, EventType::Push, Tier::Small)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "`postMerge` is not configured in configuration file"
        );
    }
}
