//! Stable case identifiers.

use std::path::{Path, PathBuf};

use crate::anchor;
use crate::catalog::KFile;

/// Identifier of one file: its path relative to the project anchor.
///
/// Without `project_root` the anchor is searched from the file's own
/// directory. When the anchor cannot be found, or the file lies outside it,
/// the absolute path is used instead.
pub fn kfile_id(kf: &KFile, project_root: Option<&Path>) -> String {
    let absolute = kf.absolute().unwrap_or_else(|_| kf.path().to_path_buf());
    let root = match project_root {
        Some(root) => Some(root.to_path_buf()),
        None => absolute
            .parent()
            .and_then(|dir| anchor::find_project_root(dir).ok()),
    };
    root.and_then(|root| relative_to(&absolute, &root))
        .unwrap_or_else(|| absolute.display().to_string())
}

/// [`kfile_id`] for every file, in order.
pub fn kfile_ids(files: &[KFile], project_root: Option<&Path>) -> Vec<String> {
    files.iter().map(|kf| kfile_id(kf, project_root)).collect()
}

/// Identifier of a case binding several files: base names joined by `,`.
pub fn group_id(files: &[KFile]) -> String {
    files
        .iter()
        .map(|kf| kf.file_name().map_or_else(|| kf.to_string(), str::to_string))
        .collect::<Vec<_>>()
        .join(",")
}

fn relative_to(path: &Path, root: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(rel.display().to_string());
    }
    // Discovery may have used a non-canonical spelling of the same root.
    let canonical_root: PathBuf = root.canonicalize().ok()?;
    let canonical_path = path.canonicalize().ok()?;
    canonical_path
        .strip_prefix(&canonical_root)
        .ok()
        .map(|rel| rel.display().to_string())
}
