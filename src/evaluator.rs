//! The KCL evaluator boundary.
//!
//! The harness never interprets KCL itself. Everything it needs from the
//! language goes through [`Evaluator`]: resolving external packages, running
//! a file, rewriting a file in place from override specs, and listing the
//! variables a file declares.
//!
//! Two failure channels exist on purpose. The outer `Result` carries
//! infrastructure failures (the evaluator could not be reached at all). The
//! `err_message` fields carry what the evaluator itself reported; a non-empty
//! message is authoritative and is never retried.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::Result;

pub mod kcl;

pub use kcl::KclCli;

/// One resolved external package: the name KCL imports it by and where its
/// sources live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalPkg {
    pub name: String,
    pub path: PathBuf,
}

/// Outcome of dependency resolution against a `kcl.mod` manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyResolution {
    pub external_pkgs: Vec<ExternalPkg>,
    pub err_message: String,
}

/// Outcome of running one or more KCL files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    /// Program output serialized as JSON.
    pub json_result: String,
    pub err_message: String,
}

impl ExecResult {
    /// Parses [`ExecResult::json_result`].
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.json_result)
    }
}

/// Diagnostic produced by an in-place override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverrideResult {
    /// Whether the evaluator reports the override as applied.
    pub result: bool,
    pub parse_errors: Vec<String>,
}

/// Variable inventory of a file, as reported by the evaluator.
pub type VariableMap = Map<String, Value>;

/// The operations the harness needs from the configuration-language
/// evaluator.
pub trait Evaluator: Send + Sync {
    /// Resolves the external dependencies declared by the manifest in
    /// `manifest_dir`.
    fn resolve_dependencies(&self, manifest_dir: &Path) -> Result<DependencyResolution>;

    /// Runs `files` as one program with `external_pkgs` available.
    fn exec(&self, files: &[PathBuf], external_pkgs: &[ExternalPkg]) -> Result<ExecResult>;

    /// Rewrites `file` in place according to `specs` (`path=value` items).
    fn override_file(&self, file: &Path, specs: &[String]) -> Result<OverrideResult>;

    fn list_variables(&self, files: &[PathBuf]) -> Result<VariableMap>;
}
