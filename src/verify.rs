//! Verifying materialized configuration with external tools.
//!
//! A test body runs a KCL file, writes the JSON result next to its scratch
//! space, and hands the path to a tool such as `frps verify --config=<path>`.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::context::ExecutionContext;
use crate::errors::{HarnessError, Result};

/// Runs `file`, writes its JSON to `<workdir>/<tool>.json` and verifies it
/// with `<tool> verify --config=<path>`. Returns the written path.
///
/// `tool` may be a bare program name or a path; the JSON file is named after
/// its final component.
///
/// A non-zero exit is [`HarnessError::VerificationFailed`] carrying the
/// tool's output.
#[tracing::instrument(skip_all, fields(tool = %tool, file = %file.display()))]
pub fn run_verify(ctx: &ExecutionContext, tool: &str, file: &Path, workdir: &Path) -> Result<PathBuf> {
    let result = ctx.exec(file)?;
    let stem = Path::new(tool)
        .file_name()
        .map_or_else(|| tool.to_string(), |name| name.to_string_lossy().into_owned());
    let config_path = workdir.join(format!("{stem}.json"));
    fs::create_dir_all(workdir).map_err(|e| HarnessError::io(workdir, e))?;
    fs::write(&config_path, &result.json_result).map_err(|e| HarnessError::io(&config_path, e))?;
    verify_config(tool, &config_path)?;
    Ok(config_path)
}

/// Runs `<tool> verify --config=<config_path>`.
pub fn verify_config(tool: &str, config_path: &Path) -> Result<()> {
    let output = Command::new(tool)
        .args(verify_args(config_path))
        .output()
        .map_err(|e| HarnessError::VerificationFailed {
            tool: tool.to_string(),
            status: None,
            stdout: String::new(),
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(HarnessError::VerificationFailed {
            tool: tool.to_string(),
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    tracing::debug!(tool, config = %config_path.display(), "verified");
    Ok(())
}

fn verify_args(config_path: &Path) -> Vec<OsString> {
    let mut config = OsString::from("--config=");
    config.push(config_path.as_os_str());
    vec!["verify".into(), config]
}
