//! Shared fixtures for the integration tests.
//!
//! [`fixture_project`] lays out a small project on disk; [`FakeEvaluator`]
//! stands in for KCL so the tests never need the real binary.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use kcl_harness::evaluator::{
    DependencyResolution, Evaluator, ExecResult, ExternalPkg, OverrideResult, VariableMap,
};
use kcl_harness::{HarnessError, Result};

pub const MAIN_K: &str = "name = \"demo\"\nreplicas = 1\n_out = manifests.yaml_stream([name])\n";
pub const FRPS_K: &str = "bindPort = 7000\n";
pub const FRPC_K: &str = "serverPort = 7000\n";
pub const RELEASE_K: &str = "chart = \"crossplane\"\n";
pub const BROKEN_K: &str = "FAIL = undefined_name\n";

/// Project tree:
///
/// ```text
/// flake.nix
/// apps/kcl.mod
/// apps/base/main.k
/// apps/broken/broken.k
/// apps/frp/frpc.k
/// apps/frp/frps.k
/// apps/helm_releases/crossplane_release.k
/// apps/notes.txt
/// apps/dir.k/            (a directory, not a file)
/// ```
pub fn fixture_project() -> TempDir {
    let dir = tempfile::Builder::new()
        .prefix("kcl-harness-fixture-")
        .tempdir()
        .unwrap();
    let root = dir.path();
    write(root, "flake.nix", "{ }\n");
    write(root, "apps/kcl.mod", "[package]\nname = \"apps\"\n");
    write(root, "apps/base/main.k", MAIN_K);
    write(root, "apps/broken/broken.k", BROKEN_K);
    write(root, "apps/frp/frpc.k", FRPC_K);
    write(root, "apps/frp/frps.k", FRPS_K);
    write(root, "apps/helm_releases/crossplane_release.k", RELEASE_K);
    write(root, "apps/notes.txt", "not kcl\n");
    fs::create_dir_all(root.join("apps/dir.k")).unwrap();
    dir
}

pub fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Canonical project root, matching what anchor lookup returns.
pub fn canonical(dir: &TempDir) -> PathBuf {
    dir.path().canonicalize().unwrap()
}

// =============================================================================
// FAKE EVALUATOR
// =============================================================================

/// In-process evaluator.
///
/// - `exec` fails with a KCL-like message when the file mentions `FAIL`,
///   otherwise returns the file's assignments as JSON.
/// - `override_file` appends `key = value` per spec; a spec without `=` is
///   reported as a parse error without touching the file.
/// - `list_variables` returns the assignments of the first file.
#[derive(Debug, Clone, Default)]
pub struct FakeEvaluator {
    pub resolutions: Arc<AtomicUsize>,
    pub resolve_error: Option<String>,
    pub resolve_delay: Duration,
    pub unreachable_override: bool,
}

impl FakeEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_resolution(message: &str) -> Self {
        Self {
            resolve_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn resolution_count(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

fn assignments(source: &str) -> Map<String, Value> {
    source
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), Value::String(v.trim().to_string())))
        .collect()
}

impl Evaluator for FakeEvaluator {
    fn resolve_dependencies(&self, manifest_dir: &Path) -> Result<DependencyResolution> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        if !self.resolve_delay.is_zero() {
            thread::sleep(self.resolve_delay);
        }
        Ok(DependencyResolution {
            external_pkgs: vec![ExternalPkg {
                name: "k8s".to_string(),
                path: manifest_dir.join(".kpm/k8s_1.28"),
            }],
            err_message: self.resolve_error.clone().unwrap_or_default(),
        })
    }

    fn exec(&self, files: &[PathBuf], external_pkgs: &[ExternalPkg]) -> Result<ExecResult> {
        let path = &files[0];
        let source = fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        if source.contains("FAIL") {
            return Ok(ExecResult {
                json_result: String::new(),
                err_message: "EvaluationError: name 'undefined_name' is not defined".to_string(),
            });
        }
        let value = json!({
            "vars": assignments(&source),
            "pkgs": external_pkgs.iter().map(|p| p.name.clone()).collect::<Vec<_>>(),
        });
        Ok(ExecResult {
            json_result: value.to_string(),
            err_message: String::new(),
        })
    }

    fn override_file(&self, file: &Path, specs: &[String]) -> Result<OverrideResult> {
        if self.unreachable_override {
            return Err(HarnessError::EvaluatorUnavailable {
                program: "fake".to_string(),
                message: "override service is down".to_string(),
            });
        }
        let mut parse_errors = Vec::new();
        let mut source = fs::read_to_string(file).map_err(|e| HarnessError::io(file, e))?;
        for spec in specs {
            match spec.split_once('=') {
                Some((key, value)) => source.push_str(&format!("{key} = {value}\n")),
                None => parse_errors.push(format!("invalid override spec '{spec}'")),
            }
        }
        fs::write(file, source).map_err(|e| HarnessError::io(file, e))?;
        Ok(OverrideResult {
            result: parse_errors.is_empty(),
            parse_errors,
        })
    }

    fn list_variables(&self, files: &[PathBuf]) -> Result<VariableMap> {
        let path = &files[0];
        let source = fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        Ok(assignments(&source))
    }
}

/// A stand-in `kcl` that understands just enough of the command line.
#[cfg(unix)]
pub fn fake_kcl(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = r#"#!/bin/sh
if [ "$1" = "mod" ]; then
  echo '{"packages": {}}'
  exit 0
fi
if [ "$1" = "run" ]; then
  file="$2"
  shift 2
  if [ "$1" = "-O" ]; then
    while [ "$#" -gt 0 ]; do
      if [ "$1" = "-O" ]; then echo "$2" >> "$file"; shift 2; else shift; fi
    done
    exit 0
  fi
  printf '{"file": "%s"}\n' "$(basename "$file")"
  exit 0
fi
echo "unsupported: $*" >&2
exit 2
"#;
    let path = dir.join("fake-kcl.sh");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}
