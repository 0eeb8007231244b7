//! Harness configuration.
//!
//! Defaults cover the common layout (`kcl.mod` workspace, `flake.nix` project
//! root, `*.k` sources). A project may override them with a
//! `kcl-harness.yaml` at its root; `KCL_HARNESS_KCL` and `KCL_HARNESS_GLOB`
//! take precedence over both.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::anchor::{KCL_MARKER, PROJECT_MARKER};
use crate::catalog::DEFAULT_GLOB;
use crate::errors::{HarnessError, Result};

/// File name looked up in the project anchor.
pub const CONFIG_FILE: &str = "kcl-harness.yaml";

/// Environment variable overriding [`HarnessConfig::kcl_program`].
pub const ENV_KCL_PROGRAM: &str = "KCL_HARNESS_KCL";

/// Environment variable overriding [`HarnessConfig::glob`].
pub const ENV_GLOB: &str = "KCL_HARNESS_GLOB";

/// Configuration for discovery, evaluation and reporting.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// KCL executable used by the CLI evaluator.
    pub kcl_program: String,
    /// Marker of the KCL workspace anchor.
    pub kcl_marker: String,
    /// Marker of the project anchor.
    pub project_marker: String,
    /// Discovery pattern.
    pub glob: String,
    /// Suffix appended to a file's name for its override backup.
    pub backup_suffix: String,
    /// Parameters never bound to matched files.
    pub excluded_params: Vec<String>,
    /// Parameter that receives the file in single-file expansion.
    pub single_file_param: String,
    /// Argument template for in-place overrides. `{file}` is the absolute
    /// file, `{specs}` expands to `-O <spec>` for every spec.
    ///
    /// The default is `kcl run <file> -O ..`. Depending on the KCL release,
    /// `-O` may only change the evaluated output and leave the source
    /// untouched; point this at a command that rewrites the file (for
    /// example a wrapper over the KCL override API) when that is the case.
    pub override_args: Vec<String>,
    /// Argument template for listing variables. `{files}` expands to the
    /// absolute files.
    pub list_variables_args: Vec<String>,
    pub use_colors: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            kcl_program: "kcl".to_string(),
            kcl_marker: KCL_MARKER.to_string(),
            project_marker: PROJECT_MARKER.to_string(),
            glob: DEFAULT_GLOB.to_string(),
            backup_suffix: ".bak".to_string(),
            excluded_params: vec!["tmp_path".to_string()],
            single_file_param: "kf".to_string(),
            override_args: vec!["run".into(), "{file}".into(), "{specs}".into()],
            list_variables_args: vec![
                "run".into(),
                "{files}".into(),
                "--format".into(),
                "json".into(),
            ],
            use_colors: atty::is(atty::Stream::Stderr),
        }
    }
}

impl HarnessConfig {
    /// Parses a YAML document. Missing keys keep their defaults.
    pub fn from_yaml(source: &str, origin: &Path) -> Result<Self> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(source).map_err(|e| HarnessError::Config {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Reads `path` as YAML configuration.
    pub fn from_file(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        Self::from_yaml(&source, path)
    }

    /// Loads `kcl-harness.yaml` from `project_root` when present, then applies
    /// environment overrides.
    pub fn load(project_root: &Path) -> Result<Self> {
        let candidate = project_root.join(CONFIG_FILE);
        let config = if candidate.is_file() {
            tracing::debug!(path = %candidate.display(), "loading harness configuration");
            Self::from_file(&candidate)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Applies environment overrides read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(program) = lookup(ENV_KCL_PROGRAM).filter(|v| !v.is_empty()) {
            self.kcl_program = program;
        }
        if let Some(glob) = lookup(ENV_GLOB).filter(|v| !v.is_empty()) {
            self.glob = glob;
        }
        self
    }

    /// Backup location of `path`: the same path with the suffix appended.
    pub fn backup_path(&self, path: &Path) -> PathBuf {
        crate::overrides::backup_path(path, &self.backup_suffix)
    }
}
