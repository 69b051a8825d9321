//! Changed-file domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a file changed between the base and target commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ChangeKind {
    Added = 1,
    Removed = 2,
    Modified = 3,
}

impl From<ChangeKind> for u8 {
    fn from(kind: ChangeKind) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for ChangeKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ChangeKind::Added),
            2 => Ok(ChangeKind::Removed),
            3 => Ok(ChangeKind::Modified),
            other => Err(format!("unknown change kind {}", other)),
        }
    }
}

/// Changed files keyed by repository-relative path
///
/// Ordered so argument lists built from it are stable.
pub type Diff = BTreeMap<String, ChangeKind>;
