//! [`Evaluator`] backed by the `kcl` command line.
//!
//! Argument vectors are built by plain functions so their shape can be tested
//! without a KCL installation.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::Deserialize;
use serde_json::Value;

use super::{DependencyResolution, Evaluator, ExecResult, ExternalPkg, OverrideResult, VariableMap};
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, Result};

/// Shape of `kcl mod metadata` output.
#[derive(Debug, Deserialize)]
struct ModMetadata {
    #[serde(default)]
    packages: BTreeMap<String, PackageMetadata>,
}

#[derive(Debug, Deserialize)]
struct PackageMetadata {
    name: String,
    manifest_path: PathBuf,
}

/// Runs the `kcl` binary for every evaluator operation.
#[derive(Debug, Clone)]
pub struct KclCli {
    program: String,
    override_args: Vec<String>,
    list_variables_args: Vec<String>,
}

impl KclCli {
    pub fn new(program: impl Into<String>) -> Self {
        let defaults = HarnessConfig::default();
        Self {
            program: program.into(),
            override_args: defaults.override_args,
            list_variables_args: defaults.list_variables_args,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            program: config.kcl_program.clone(),
            override_args: config.override_args.clone(),
            list_variables_args: config.list_variables_args.clone(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn run(&self, args: &[OsString], cwd: Option<&Path>) -> Result<Output> {
        tracing::debug!(program = %self.program, ?args, "invoking kcl");
        let mut command = Command::new(&self.program);
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        command
            .output()
            .map_err(|e| HarnessError::EvaluatorUnavailable {
                program: self.program.clone(),
                message: e.to_string(),
            })
    }
}

impl Evaluator for KclCli {
    fn resolve_dependencies(&self, manifest_dir: &Path) -> Result<DependencyResolution> {
        let output = self.run(&metadata_args(), Some(manifest_dir))?;
        if !output.status.success() {
            return Ok(DependencyResolution {
                external_pkgs: Vec::new(),
                err_message: failure_message(&output),
            });
        }
        let external_pkgs = parse_metadata(&String::from_utf8_lossy(&output.stdout))
            .map_err(|message| HarnessError::EvaluatorUnavailable {
                program: self.program.clone(),
                message,
            })?;
        Ok(DependencyResolution {
            external_pkgs,
            err_message: String::new(),
        })
    }

    fn exec(&self, files: &[PathBuf], external_pkgs: &[ExternalPkg]) -> Result<ExecResult> {
        let output = self.run(&exec_args(files, external_pkgs), None)?;
        if !output.status.success() {
            return Ok(ExecResult {
                json_result: String::new(),
                err_message: failure_message(&output),
            });
        }
        Ok(ExecResult {
            json_result: String::from_utf8_lossy(&output.stdout).into_owned(),
            err_message: String::new(),
        })
    }

    fn override_file(&self, file: &Path, specs: &[String]) -> Result<OverrideResult> {
        let args = expand_template(&self.override_args, &[file.to_path_buf()], specs);
        let output = self.run(&args, None)?;
        let mut parse_errors: Vec<String> = String::from_utf8_lossy(&output.stderr)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if parse_errors.is_empty() && !output.status.success() {
            parse_errors.push(failure_message(&output));
        }
        Ok(OverrideResult {
            result: output.status.success(),
            parse_errors,
        })
    }

    fn list_variables(&self, files: &[PathBuf]) -> Result<VariableMap> {
        let args = expand_template(&self.list_variables_args, files, &[]);
        let output = self.run(&args, None)?;
        if !output.status.success() {
            return Err(HarnessError::EvaluationFailed {
                path: files.first().cloned().unwrap_or_default(),
                message: failure_message(&output),
            });
        }
        match serde_json::from_slice::<Value>(&output.stdout) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(HarnessError::EvaluatorUnavailable {
                program: self.program.clone(),
                message: format!("expected a JSON object of variables, got {other}"),
            }),
            Err(e) => Err(HarnessError::EvaluatorUnavailable {
                program: self.program.clone(),
                message: format!("could not decode variables: {e}"),
            }),
        }
    }
}

// =============================================================================
// ARGUMENT BUILDERS
// =============================================================================

/// `kcl mod metadata --update`
pub fn metadata_args() -> Vec<OsString> {
    ["mod", "metadata", "--update"]
        .into_iter()
        .map(OsString::from)
        .collect()
}

/// `kcl run <files..> --format json -E name=path ..`
pub fn exec_args(files: &[PathBuf], external_pkgs: &[ExternalPkg]) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["run".into()];
    args.extend(files.iter().map(|f| f.as_os_str().to_os_string()));
    args.push("--format".into());
    args.push("json".into());
    for pkg in external_pkgs {
        let mut external = OsString::from(format!("{}=", pkg.name));
        external.push(pkg.path.as_os_str());
        args.push("-E".into());
        args.push(external);
    }
    args
}

/// Expands an argument template.
///
/// `{file}` becomes the first file, `{files}` every file, `{specs}` one
/// `-O <spec>` pair per spec. Other items pass through unchanged.
pub fn expand_template(template: &[String], files: &[PathBuf], specs: &[String]) -> Vec<OsString> {
    let mut args = Vec::with_capacity(template.len() + files.len() + specs.len() * 2);
    for item in template {
        match item.as_str() {
            "{file}" => {
                if let Some(file) = files.first() {
                    args.push(file.as_os_str().to_os_string());
                }
            }
            "{files}" => args.extend(files.iter().map(|f| f.as_os_str().to_os_string())),
            "{specs}" => {
                for spec in specs {
                    args.push("-O".into());
                    args.push(spec.into());
                }
            }
            other => args.push(other.into()),
        }
    }
    args
}

/// Parses `kcl mod metadata` output into external packages, sorted by name.
fn parse_metadata(stdout: &str) -> std::result::Result<Vec<ExternalPkg>, String> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let metadata: ModMetadata =
        serde_json::from_str(stdout).map_err(|e| format!("could not decode mod metadata: {e}"))?;
    Ok(metadata
        .packages
        .into_values()
        .map(|pkg| ExternalPkg {
            name: pkg.name,
            path: pkg.manifest_path,
        })
        .collect())
}

/// Error text of a failed run: stderr, or stdout when stderr is empty.
fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !stdout.is_empty() {
        return stdout;
    }
    format!("kcl exited with {}", output.status)
}
