//! Workspace path allow-listing.
//!
//! Any caller-supplied working directory must fall inside one of the
//! configured workspace roots before it reaches a session start. An empty
//! root list allows nothing.

use std::path::{Path, PathBuf};

/// Best-effort absolute form: canonicalize when the path exists, otherwise
/// fall back to the path as given so non-existent candidates still compare.
fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Whether `path` equals, or descends from, one of `roots`.
pub fn is_allowed_path(path: &Path, roots: &[PathBuf]) -> bool {
    if roots.is_empty() {
        return false;
    }
    let target = normalize(path);
    roots.iter().any(|root| target.starts_with(normalize(root)))
}
