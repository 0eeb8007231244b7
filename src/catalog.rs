//! File catalog: discovers KCL files under an anchor directory.
//!
//! The catalog is built once per session and shared read-only by every
//! selection afterwards. Discovery walks the tree in file-name order so the
//! same tree always yields the same catalog.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use walkdir::{DirEntry, WalkDir};

use crate::anchor;
use crate::errors::{HarnessError, Result};

/// Default discovery pattern: every KCL source file.
pub const DEFAULT_GLOB: &str = "*.k";

/// Shared predicate over discovered files.
pub type KFilter = Arc<dyn Fn(&KFile) -> bool + Send + Sync>;

/// Wraps a closure as a [`KFilter`].
pub fn kfilter<F>(f: F) -> KFilter
where
    F: Fn(&KFile) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

// =============================================================================
// FILE HANDLE
// =============================================================================

/// Immutable handle to one discovered file. Equality and ordering are by path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct KFile {
    path: PathBuf,
}

impl KFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base file name, e.g. `FRPC_Config.k`.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// True when any component of the path equals `part`.
    ///
    /// `kf.has_component("base")` selects every file below a `base/` directory.
    pub fn has_component(&self, part: &str) -> bool {
        self.path.components().any(|c| match c {
            Component::Normal(name) => name == part,
            _ => false,
        })
    }

    /// Absolute form of the path, relative paths joined onto the working
    /// directory.
    pub fn absolute(&self) -> Result<PathBuf> {
        anchor::absolute(&self.path)
    }

    pub fn read_to_string(&self) -> Result<String> {
        std::fs::read_to_string(&self.path).map_err(|e| HarnessError::io(&self.path, e))
    }
}

impl fmt::Display for KFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl AsRef<Path> for KFile {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// GLOB PATTERNS
// =============================================================================

/// A recursive glob such as `*.k` or `base/*.k`.
///
/// Patterns without a `/` match the file name anywhere below the root.
/// Patterns with a `/` match the trailing components of the path relative to
/// the root. `*` and `?` stay within one component, `**` crosses components.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
    by_name: bool,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let translated = translate_glob(pattern);
        let regex = Regex::new(&translated).map_err(|e| HarnessError::Config {
            path: PathBuf::from(pattern),
            message: format!("invalid glob pattern: {e}"),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
            by_name: !pattern.contains('/'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Matches `relative`, a path below the discovery root.
    pub fn matches(&self, relative: &Path) -> bool {
        if self.by_name {
            return relative
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| self.regex.is_match(name));
        }
        let Some(text) = relative.to_str() else {
            return false;
        };
        let text = text.replace('\\', "/");
        self.regex.is_match(&text)
    }
}

impl Default for GlobPattern {
    fn default() -> Self {
        Self {
            source: DEFAULT_GLOB.to_string(),
            regex: DEFAULT_GLOB_REGEX.clone(),
            by_name: true,
        }
    }
}

lazy_static! {
    static ref DEFAULT_GLOB_REGEX: Regex =
        Regex::new(&translate_glob(DEFAULT_GLOB)).expect("default glob translates to a valid regex");
}

/// Translates a glob into an anchored regex.
fn translate_glob(pattern: &str) -> String {
    let mut out = String::from(if pattern.contains('/') { "(^|/)" } else { "^" });
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                // `**/` also matches zero directories.
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                if let Some(end) = chars[i + 1..].iter().position(|c| *c == ']') {
                    let class: String = chars[i + 1..i + 1 + end].iter().collect();
                    let class = class.strip_prefix('!').map_or(class.clone(), |rest| {
                        format!("^{rest}")
                    });
                    out.push('[');
                    out.push_str(&class.replace('\\', "\\\\"));
                    out.push(']');
                    i += end + 2;
                    continue;
                }
                out.push_str(r"\[");
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

// =============================================================================
// DISCOVERY
// =============================================================================

/// Discovers files under `root` matching `pattern`, keeping those accepted by
/// `predicate`.
///
/// Files come in recursive-glob order: each directory's files by name, then
/// its subdirectories. Non-regular files are skipped, and so are
/// subdirectories that cannot be read. An unreadable `root` is an error.
#[tracing::instrument(skip_all, fields(root = %root.display(), pattern = pattern.as_str()))]
pub fn discover<F>(root: &Path, pattern: &GlobPattern, predicate: F) -> Result<Vec<KFile>>
where
    F: Fn(&KFile) -> bool,
{
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by(files_first) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                let path = e.path().unwrap_or(root).to_path_buf();
                return Err(HarnessError::io(path, e.into()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };

        let is_regular = entry.file_type().is_file()
            || (entry.path_is_symlink() && entry.path().is_file());
        if !is_regular {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if !pattern.matches(relative) {
            continue;
        }

        let kf = KFile::new(entry.path());
        if predicate(&kf) {
            files.push(kf);
        }
    }
    tracing::debug!(count = files.len(), "discovered files");
    Ok(files)
}

/// Directory order of the walk: a directory's own files, then its
/// subdirectories, each by name.
fn files_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// Discovers KCL files with the usual defaults: the project anchor above the
/// working directory as root, `*.k` as pattern, and no filter.
pub fn find_kcl_files(
    root: Option<&Path>,
    glob: Option<&str>,
    filter: Option<&KFilter>,
) -> Result<Vec<KFile>> {
    let root = match root {
        Some(root) => root.to_path_buf(),
        None => {
            let cwd = std::env::current_dir().map_err(|e| HarnessError::io(".", e))?;
            anchor::find_project_root(&cwd)?
        }
    };
    let pattern = match glob {
        Some(glob) => GlobPattern::new(glob)?,
        None => GlobPattern::default(),
    };
    match filter {
        Some(filter) => discover(&root, &pattern, |kf| filter(kf)),
        None => discover(&root, &pattern, |_| true),
    }
}

/// The session-wide, ordered universe of discovered files.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    root: PathBuf,
    files: Vec<KFile>,
}

impl Catalog {
    /// Builds the catalog by discovering every file under `root`.
    pub fn discover(root: &Path, pattern: &GlobPattern) -> Result<Self> {
        let files = discover(root, pattern, |_| true)?;
        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }

    /// Wraps an already ordered list of files.
    pub fn from_files(root: impl Into<PathBuf>, files: Vec<KFile>) -> Self {
        Self {
            root: root.into(),
            files,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> &[KFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KFile> {
        self.files.iter()
    }
}
