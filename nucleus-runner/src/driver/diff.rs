//! Submodule diff rebasing

use nucleus_core::domain::diff::Diff;

/// Normalises a submodule path to `dir/` form; empty for the repository root
pub fn normalize_module_path(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches("./");
    if trimmed.is_empty() || trimmed == "." {
        return String::new();
    }
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

/// Re-expresses repository-relative diff keys relative to the submodule at `path`
///
/// Keys outside the submodule are kept as they are.
pub fn rebase_diff(diff: &Diff, path: &str) -> Diff {
    let prefix = normalize_module_path(path);
    diff.iter()
        .map(|(file, kind)| {
            let rebased = file.strip_prefix(prefix.as_str()).unwrap_or(file);
            (rebased.to_string(), *kind)
        })
        .collect()
}
