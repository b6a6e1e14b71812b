//! Path utility functions for normalization and instance-relative paths.
//!
//! Registry paths are stored relative to the instance root with forward
//! slashes on every platform; these helpers convert between that form and
//! absolute paths.

use std::path::{Component, Path, PathBuf};

/// Normalize a path by processing `.` and `..` components lexically.
/// This does not access the filesystem and does not follow symlinks.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Keep `..` when there is nothing left to pop
                if !result.pop() {
                    result.push(component);
                }
            }
            _ => {
                result.push(component);
            }
        }
    }
    result
}

/// Check if a path is under a given directory by comparing normalized path components.
/// Returns true if `path` is `dir` or lies beneath it.
///
/// # Security
/// Both paths are normalized first, so `/games/ksp/GameData/../../etc` is NOT
/// under `/games/ksp`.
pub fn is_path_under(path: &Path, dir: &Path) -> bool {
    let normalized_path = normalize_path(path);
    let normalized_dir = normalize_path(dir);

    let path_components: Vec<_> = normalized_path.components().collect();
    let dir_components: Vec<_> = normalized_dir.components().collect();

    if path_components.len() < dir_components.len() {
        return false;
    }

    dir_components
        .iter()
        .zip(path_components.iter())
        .all(|(d, p)| d == p)
}

/// Path of `path` relative to `root`, with forward slashes.
///
/// Returns `None` when `path` is outside `root` or no relative path exists
/// (e.g., different drive letters on Windows).
pub fn relative_to_root(root: &Path, path: &Path) -> Option<String> {
    let path = normalize_path(path);
    let root = normalize_path(root);
    if !is_path_under(&path, &root) {
        return None;
    }
    let relative = pathdiff::diff_paths(&path, &root)?;
    if relative.is_absolute() {
        return None;
    }

    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Absolute path of a registry-relative path, or `None` if it would escape `root`.
pub fn resolve_under_root(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if relative.is_absolute() {
        return None;
    }
    let resolved = normalize_path(&root.join(relative));
    is_path_under(&resolved, &normalize_path(root)).then_some(resolved)
}
