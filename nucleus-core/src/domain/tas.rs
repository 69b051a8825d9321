//! Test configuration schemas
//!
//! A repository declares how its tests are discovered and run in a YAML file.
//! Two schema versions exist:
//! - V1: a single module with one pre/post-merge block
//! - V2: per merge block, a list of path-scoped submodules
//!
//! The loader resolves the version once and hands drivers a [`TasConfig`] variant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::payload::{EventType, Tier};

/// Supported test frameworks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Jest,
    Mocha,
    Jasmine,
    Junit,
}

/// Language family a framework belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    JavaScript,
    Java,
}

impl Framework {
    pub fn language(self) -> Language {
        match self {
            Framework::Jest | Framework::Mocha | Framework::Jasmine => Language::JavaScript,
            Framework::Junit => Language::Java,
        }
    }

    /// Program that implements the discover/execute protocol for this framework
    pub fn runner(self) -> &'static str {
        match self {
            Framework::Jest => "./node_modules/.bin/jest-runner",
            Framework::Mocha => "./node_modules/.bin/mocha-runner",
            Framework::Jasmine => "./node_modules/.bin/jasmine-runner",
            Framework::Junit => "java",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Framework::Jest => "jest",
            Framework::Mocha => "mocha",
            Framework::Jasmine => "jasmine",
            Framework::Junit => "junit",
        };
        write!(f, "{}", name)
    }
}

/// How discovered tests are split across parallel executors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    #[default]
    Test,
    File,
}

/// Commands plus the environment they run with
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Run {
    #[serde(rename = "command", default)]
    pub commands: Vec<String>,
    #[serde(rename = "env", default)]
    pub env: BTreeMap<String, String>,
}

/// Dependency cache declaration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cache {
    pub key: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub version: String,
}

/// V1 merge block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Merge {
    #[serde(rename = "pattern", default)]
    pub patterns: Vec<String>,
    #[serde(rename = "env", default)]
    pub env: BTreeMap<String, String>,
}

/// Schema version 1: a single test module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasConfigV1 {
    #[serde(default = "default_smart_run")]
    pub smart_run: bool,
    pub framework: Framework,
    #[serde(default)]
    pub framework_version: Option<u32>,
    #[serde(default)]
    pub blocklist: Vec<String>,
    #[serde(default)]
    pub pre_merge: Option<Merge>,
    #[serde(default)]
    pub post_merge: Option<Merge>,
    #[serde(default)]
    pub cache: Option<Cache>,
    #[serde(default)]
    pub pre_run: Option<Run>,
    #[serde(default)]
    pub post_run: Option<Run>,
    #[serde(default)]
    pub parallelism: u32,
    #[serde(default)]
    pub split_mode: SplitMode,
    #[serde(default)]
    pub skip_cache: bool,
    #[serde(default)]
    pub config_file: Option<String>,
    #[serde(default)]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub node_version: Option<String>,
    #[serde(default)]
    pub container_image: String,
}

impl TasConfigV1 {
    /// Merge block consulted for the given event
    pub fn merge_for(&self, event: EventType) -> Option<&Merge> {
        match event {
            EventType::PullRequest => self.pre_merge.as_ref(),
            EventType::Push => self.post_merge.as_ref(),
        }
    }
}

/// A path-scoped unit of test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubModule {
    pub name: String,
    pub path: String,
    #[serde(rename = "pattern", default)]
    pub patterns: Vec<String>,
    pub framework: Framework,
    #[serde(default)]
    pub framework_version: Option<u32>,
    #[serde(default)]
    pub config_file: Option<String>,
    #[serde(default)]
    pub blocklist: Vec<String>,
    #[serde(default)]
    pub pre_run: Option<Run>,
    #[serde(default)]
    pub post_run: Option<Run>,
    #[serde(default)]
    pub run_prerun_every_time: bool,
    #[serde(default)]
    pub parallelism: u32,
}

impl SubModule {
    /// True when the submodule lives at the repository root
    pub fn is_root(&self) -> bool {
        matches!(self.path.trim(), "" | "." | "./")
    }
}

/// V2 merge block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeV2 {
    #[serde(default)]
    pub pre_run: Option<Run>,
    #[serde(default)]
    pub sub_modules: Vec<SubModule>,
    #[serde(rename = "env", default)]
    pub env: BTreeMap<String, String>,
}

/// Schema version 2: several submodules per merge block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasConfigV2 {
    #[serde(default = "default_smart_run")]
    pub smart_run: bool,
    #[serde(default)]
    pub cache: Option<Cache>,
    #[serde(default)]
    pub pre_merge: Option<MergeV2>,
    #[serde(default)]
    pub post_merge: Option<MergeV2>,
    #[serde(default)]
    pub parallelism: u32,
    #[serde(default)]
    pub split_mode: SplitMode,
    #[serde(default)]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub node_version: Option<String>,
    #[serde(default)]
    pub container_image: String,
}

impl TasConfigV2 {
    pub fn merge_for(&self, event: EventType) -> Option<&MergeV2> {
        match event {
            EventType::PullRequest => self.pre_merge.as_ref(),
            EventType::Push => self.post_merge.as_ref(),
        }
    }
}

fn default_smart_run() -> bool {
    true
}

/// A loaded configuration, tagged by schema version
#[derive(Debug, Clone)]
pub enum TasConfig {
    V1(TasConfigV1),
    V2(TasConfigV2),
}

impl TasConfig {
    pub fn version(&self) -> u32 {
        match self {
            TasConfig::V1(_) => 1,
            TasConfig::V2(_) => 2,
        }
    }
}
