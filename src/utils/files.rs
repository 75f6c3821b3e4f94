//! Local path helpers for the file synchronization.

use std::path::Path;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Derive the forward-slash relative path of `path` under `base`, the form
/// used for device filesystem names and for exclusion matching. Falls back
/// to canonicalized paths so a relative root and an absolute file still
/// relate. Returns `None` when `path` is not under `base`.
pub(crate) fn unix_relative_path(base: &Path, path: &Path) -> Option<String> {
    if let Ok(relative) = path.strip_prefix(base) {
        return Some(to_unix(relative));
    }
    let base = base.canonicalize().ok()?;
    let path = path.canonicalize().ok()?;
    path.strip_prefix(&base).ok().map(to_unix)
}

/// The on-device name `node.compile` produces for a Lua source, used when
/// cleaning up after a failed transfer.
pub(crate) fn compiled_counterpart(relative: &str) -> Option<String> {
    relative
        .strip_suffix(".lua")
        .map(|stem| format!("{}.lc", stem))
}

/// Normalize one exclusion argument to the forward-slash relative form.
/// Absolute paths are relativized against the root and dropped when they do
/// not live under it; relative ones just get their separators and leading
/// slash cleaned up.
pub(crate) fn normalize_exclude_entry(root: &Path, value: &str) -> Option<String> {
    let candidate = Path::new(value);
    if candidate.is_absolute() {
        return unix_relative_path(root, candidate);
    }
    let cleaned = value.trim().replace('\\', "/");
    Some(cleaned.trim_start_matches('/').to_string())
}

/// Normalize a whole exclusion list against the root directory, dropping
/// entries that cannot relate to it.
pub(crate) fn normalized_exclude_set(
    root: &Path,
    entries: &[String],
) -> std::collections::HashSet<String> {
    entries
        .iter()
        .filter_map(|entry| normalize_exclude_entry(root, entry))
        .collect()
}

// =============================================================================
// Private stuff
// =============================================================================

fn to_unix(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn relative_path_uses_forward_slashes() {
        let base = PathBuf::from("/project");
        let path = PathBuf::from("/project/lib/util.lua");
        assert_eq!(
            unix_relative_path(&base, &path).unwrap(),
            "lib/util.lua".to_string()
        );
    }

    #[test]
    fn relative_path_rejects_outsiders() {
        let base = PathBuf::from("/project");
        let path = PathBuf::from("/elsewhere/util.lua");
        assert_eq!(unix_relative_path(&base, &path), None);
    }

    #[test]
    fn compiled_counterpart_for_lua_sources() {
        assert_eq!(compiled_counterpart("a/b.lua").unwrap(), "a/b.lc");
        assert_eq!(compiled_counterpart("init.lua").unwrap(), "init.lc");
        assert_eq!(compiled_counterpart("data.json"), None);
        assert_eq!(compiled_counterpart("blob.bin"), None);
    }

    #[test]
    fn exclude_entries_are_cleaned_up() {
        let root = PathBuf::from("/project");
        assert_eq!(
            normalize_exclude_entry(&root, "lib\\util.lua").unwrap(),
            "lib/util.lua"
        );
        assert_eq!(
            normalize_exclude_entry(&root, "/init.lua").unwrap(),
            "init.lua"
        );
        assert_eq!(
            normalize_exclude_entry(&root, " doc/readme.md ").unwrap(),
            "doc/readme.md"
        );
    }

    #[test]
    fn absolute_exclude_entries_are_relativized() {
        let root = PathBuf::from("/project");
        assert_eq!(
            normalize_exclude_entry(&root, "/project/lib/util.lua").unwrap(),
            "lib/util.lua"
        );
        assert_eq!(normalize_exclude_entry(&root, "/elsewhere/x.lua"), None);
    }
}
