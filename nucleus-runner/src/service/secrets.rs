//! Secret parser
//!
//! Reads the git provider OAuth token and the repository secrets mounted into the
//! container, substitutes `${{ secrets.NAME }}` placeholders and masks secret values
//! in captured output.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nucleus_core::domain::payload::Oauth;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

/// Repository secrets by name
pub type Secrets = BTreeMap<String, String>;

const MASK: &str = "****";

static SECRET_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*secrets\.(.*?)\s*\}\}"));

#[derive(Deserialize)]
struct SecretFile<T> {
    data: T,
}

#[async_trait]
pub trait SecretParser: Send + Sync {
    /// Reads the OAuth token of the git provider
    async fn get_oauth_secret(&self, path: &Path) -> Result<Oauth>;

    /// Reads the repository secrets; a missing file yields no secrets
    async fn get_repo_secrets(&self, path: &Path) -> Result<Secrets>;
}

/// Reads secrets from JSON files of the form `{"data": ...}`
pub struct FileSecretParser;

#[async_trait]
impl SecretParser for FileSecretParser {
    async fn get_oauth_secret(&self, path: &Path) -> Result<Oauth> {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read oauth secret {}", path.display()))?;
        let file: SecretFile<Oauth> =
            serde_json::from_slice(&raw).context("failed to parse oauth secret")?;
        Ok(file.data)
    }

    async fn get_repo_secrets(&self, path: &Path) -> Result<Secrets> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::debug!("No repo secrets at {}", path.display());
            return Ok(Secrets::new());
        }
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read repo secrets {}", path.display()))?;
        let file: SecretFile<Secrets> =
            serde_json::from_slice(&raw).context("failed to parse repo secrets")?;
        Ok(file.data)
    }
}

/// Replaces every `${{ secrets.NAME }}` in `input` with the secret's value
///
/// Referencing a secret that does not exist is an error.
pub fn substitute_secrets(input: &str, secrets: &Secrets) -> Result<String> {
    let pattern = SECRET_PATTERN
        .as_ref()
        .map_err(|e| anyhow::anyhow!("invalid secret pattern: {}", e))?;

    let mut output = String::with_capacity(input.len());
    let mut last = 0;
    for caps in pattern.captures_iter(input) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = secrets
            .get(name.as_str())
            .with_context(|| format!("secret with name {} not found", name.as_str()))?;
        output.push_str(&input[last..whole.start()]);
        output.push_str(value);
        last = whole.end();
    }
    output.push_str(&input[last..]);
    Ok(output)
}

/// Substitutes secrets in every value of an environment map
pub fn substitute_env(
    env: &BTreeMap<String, String>,
    secrets: &Secrets,
) -> Result<BTreeMap<String, String>> {
    env.iter()
        .map(|(key, value)| Ok((key.clone(), substitute_secrets(value, secrets)?)))
        .collect()
}

/// Hides every secret value occurring in `text`
pub fn mask_secrets(text: &str, secrets: &Secrets) -> String {
    secrets
        .values()
        .filter(|value| !value.is_empty())
        .fold(text.to_string(), |acc, value| acc.replace(value.as_str(), MASK))
}
