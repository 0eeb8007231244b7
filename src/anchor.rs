//! Anchor lookup.
//!
//! An anchor is the nearest ancestor directory holding a marker file. The
//! harness uses two independent anchors: the KCL workspace (`kcl.mod`), which
//! dependency resolution runs against, and the project root (`flake.nix` by
//! default), which test ids are made relative to. Nothing here caches; callers
//! keep the result if they need it again.

use std::path::{Path, PathBuf};

use crate::errors::{HarnessError, Result};

/// Marker of the KCL workspace anchor.
pub const KCL_MARKER: &str = "kcl.mod";

/// Default marker of the project anchor.
pub const PROJECT_MARKER: &str = "flake.nix";

/// Walks upward from `start` until a directory containing `marker` is found.
///
/// A file `start` begins the search at its parent. The search stops at the
/// filesystem root, detected when a directory has no further parent.
pub fn locate(start: &Path, marker: &str) -> Result<PathBuf> {
    let resolved = absolutize(start)?;
    let mut current = if resolved.is_file() {
        match resolved.parent() {
            Some(parent) => parent.to_path_buf(),
            None => resolved.clone(),
        }
    } else {
        resolved.clone()
    };

    loop {
        if current.join(marker).exists() {
            tracing::debug!(marker, anchor = %current.display(), "anchor found");
            return Ok(current);
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent.to_path_buf(),
            _ => {
                return Err(HarnessError::AnchorNotFound {
                    marker: marker.to_string(),
                    start: resolved,
                })
            }
        }
    }
}

/// Locates the KCL workspace anchor above `start`.
pub fn find_kcl_root(start: &Path) -> Result<PathBuf> {
    locate(start, KCL_MARKER)
}

/// Locates the project anchor above `start` using the default marker.
pub fn find_project_root(start: &Path) -> Result<PathBuf> {
    locate(start, PROJECT_MARKER)
}

/// Canonical form of `path`, falling back to [`absolute`] when it does not
/// exist yet.
fn absolutize(path: &Path) -> Result<PathBuf> {
    match path.canonicalize() {
        Ok(canonical) => Ok(canonical),
        Err(_) => absolute(path),
    }
}

/// `path` joined onto the working directory unless it is already absolute.
/// Does not touch the filesystem beyond reading the working directory.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| HarnessError::io(path, e))?;
    Ok(cwd.join(path))
}
