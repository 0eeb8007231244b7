//! Verification of materialized configuration by an external tool.

#![cfg(unix)]

mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use kcl_harness::catalog::KFile;
use kcl_harness::context::ExecutionContext;
use kcl_harness::overrides::with_overrides;
use kcl_harness::verify::run_verify;
use kcl_harness::HarnessError;

use common::{canonical, fixture_project, FakeEvaluator};

/// Accepts a config only when it mentions `bindPort`.
fn fake_tool(dir: &Path) -> PathBuf {
    let script = r#"#!/bin/sh
[ "$1" = "verify" ] || { echo "usage: verify --config=PATH" >&2; exit 2; }
path="${2#--config=}"
if grep -q bindPort "$path"; then
  echo "configuration file $path syntax is ok"
  exit 0
fi
echo "bindPort is required" >&2
exit 1
"#;
    let path = dir.join("frps");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[test]
fn verify_accepts_materialized_config() {
    let project = fixture_project();
    let apps = canonical(&project).join("apps");
    let ctx = ExecutionContext::initialize(Box::new(FakeEvaluator::new()), &apps).unwrap();
    let tool = fake_tool(project.path());
    let workdir = tempfile::tempdir().unwrap();

    let written = run_verify(
        &ctx,
        tool.to_str().unwrap(),
        &apps.join("frp/frps.k"),
        workdir.path(),
    )
    .unwrap();

    assert_eq!(written, workdir.path().join("frps.json"));
    assert!(fs::read_to_string(&written).unwrap().contains("bindPort"));
}

#[test]
fn verify_failure_carries_tool_output() {
    let project = fixture_project();
    let apps = canonical(&project).join("apps");
    let ctx = ExecutionContext::initialize(Box::new(FakeEvaluator::new()), &apps).unwrap();
    let tool = fake_tool(project.path());
    let workdir = tempfile::tempdir().unwrap();

    let err = run_verify(
        &ctx,
        tool.to_str().unwrap(),
        &apps.join("helm_releases/crossplane_release.k"),
        workdir.path(),
    )
    .unwrap_err();

    match err {
        HarnessError::VerificationFailed { status, stderr, .. } => {
            assert_eq!(status, Some(1));
            assert!(stderr.contains("bindPort is required"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn verify_inside_override_transaction() {
    let project = fixture_project();
    let apps = canonical(&project).join("apps");
    let ctx = ExecutionContext::initialize(Box::new(FakeEvaluator::new()), &apps).unwrap();
    let tool = fake_tool(project.path());
    let workdir = tempfile::tempdir().unwrap();
    let release = KFile::new(apps.join("helm_releases/crossplane_release.k"));
    let original = release.read_to_string().unwrap();

    with_overrides(&ctx, [(release.clone(), vec!["bindPort=7000".to_string()])], |_| {
        run_verify(&ctx, tool.to_str().unwrap(), release.path(), workdir.path()).map(|_| ())
    })
    .unwrap();

    assert_eq!(release.read_to_string().unwrap(), original);
}
