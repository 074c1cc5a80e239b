//! Root containment checks.
//!
//! Paths are compared lexically: `.` and `..` are folded without touching the
//! filesystem, so a path that climbs out of a root is rejected even if the
//! target does not exist.

use std::path::{Component, Path, PathBuf};

use capgate::Root;

/// Fold `.` and `..` out of `path`. `..` never climbs above the filesystem
/// root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve a requested path the way the adapter will: absolute paths as
/// given, relative ones against the first filesystem root in `base` (the
/// adapter's own declared roots). `None` for a relative path with no base.
pub fn anchor(path: &str, base: &[Root]) -> Option<PathBuf> {
    let requested = Path::new(path.strip_prefix("file://").unwrap_or(path));
    if requested.is_absolute() {
        return Some(normalize(requested));
    }
    base.iter()
        .find_map(Root::as_path)
        .map(|root| normalize(&root.join(requested)))
}

/// Whether the absolute `path` lies inside at least one of `roots`. Roots
/// that do not name a filesystem location are skipped.
pub fn is_within(path: &Path, roots: &[Root]) -> bool {
    if !path.is_absolute() {
        return false;
    }
    let path = normalize(path);
    roots
        .iter()
        .filter_map(Root::as_path)
        .any(|root| path.starts_with(normalize(&root)))
}
