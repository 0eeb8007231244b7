//! Override transactions restore files on every exit path.

mod common;

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use kcl_harness::catalog::KFile;
use kcl_harness::context::ExecutionContext;
use kcl_harness::overrides::{backup_path, with_overrides, OverrideGuard};
use kcl_harness::HarnessError;

use common::{canonical, fixture_project, FakeEvaluator, FRPC_K, FRPS_K};

struct Fixture {
    _project: tempfile::TempDir,
    apps: PathBuf,
    ctx: ExecutionContext,
}

fn fixture(fake: FakeEvaluator) -> Fixture {
    let project = fixture_project();
    let apps = canonical(&project).join("apps");
    let ctx = ExecutionContext::initialize(Box::new(fake), &apps).unwrap();
    Fixture {
        _project: project,
        apps,
        ctx,
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

fn assert_no_backup(path: &Path) {
    assert!(!backup_path(path, ".bak").exists(), "backup left behind for {}", path.display());
}

#[test]
fn round_trip_restores_content_and_yields_diagnostics() {
    let fx = fixture(FakeEvaluator::new());
    let frps = KFile::new(fx.apps.join("frp/frps.k"));
    let frpc = KFile::new(fx.apps.join("frp/frpc.k"));

    let seen = with_overrides(
        &fx.ctx,
        [
            (frps.clone(), vec!["bindPort=7001".to_string()]),
            (frpc.clone(), vec!["serverPort=7001".to_string()]),
        ],
        |results| {
            assert_eq!(results.len(), 2);
            assert!(results.all_applied());
            let files: Vec<&KFile> = results.iter().map(|(kf, _)| kf).collect();
            assert_eq!(files, vec![&frps, &frpc]);

            let materialized = fx.ctx.exec(frps.path())?.to_value().map_err(|e| {
                HarnessError::io(frps.path(), e.into())
            })?;
            Ok::<_, HarnessError>(materialized["vars"]["bindPort"].clone())
        },
    )
    .unwrap();

    assert_eq!(seen, "7001");
    assert_eq!(read(frps.path()), FRPS_K);
    assert_eq!(read(frpc.path()), FRPC_K);
    assert_no_backup(frps.path());
    assert_no_backup(frpc.path());
}

#[test]
fn body_error_still_restores_and_wins() {
    let fx = fixture(FakeEvaluator::new());
    let frps = KFile::new(fx.apps.join("frp/frps.k"));

    let result: miette::Result<()> = with_overrides(
        &fx.ctx,
        [(frps.clone(), vec!["bindPort=7001".to_string()])],
        |_| {
            assert!(read(frps.path()).contains("bindPort = 7001"));
            miette::bail!("frps verify failed")
        },
    );

    let err = result.unwrap_err();
    assert!(err.to_string().contains("frps verify failed"));
    assert_eq!(read(frps.path()), FRPS_K);
    assert_no_backup(frps.path());
}

#[test]
fn panic_inside_transaction_restores() {
    let fx = fixture(FakeEvaluator::new());
    let frps = KFile::new(fx.apps.join("frp/frps.k"));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let _: Result<(), HarnessError> =
            with_overrides(&fx.ctx, [(frps.clone(), vec!["bindPort=1".to_string()])], |_| {
                panic!("body exploded")
            });
    }));

    assert!(outcome.is_err());
    assert_eq!(read(frps.path()), FRPS_K);
    assert_no_backup(frps.path());
}

#[test]
fn parse_errors_are_reported_not_raised() {
    let fx = fixture(FakeEvaluator::new());
    let frps = KFile::new(fx.apps.join("frp/frps.k"));

    with_overrides(&fx.ctx, [(frps.clone(), vec!["no-equals-sign".to_string()])], |results| {
        let result = results.get(&frps).unwrap();
        assert!(!result.result);
        assert_eq!(result.parse_errors, vec!["invalid override spec 'no-equals-sign'".to_string()]);
        Ok::<_, HarnessError>(())
    })
    .unwrap();
    assert_eq!(read(frps.path()), FRPS_K);
}

#[test]
fn failing_override_restores_every_file() {
    let fake = FakeEvaluator {
        unreachable_override: true,
        ..FakeEvaluator::new()
    };
    let fx = fixture(fake);
    let frps = KFile::new(fx.apps.join("frp/frps.k"));
    let frpc = KFile::new(fx.apps.join("frp/frpc.k"));
    let mut body_ran = false;

    let err = with_overrides(
        &fx.ctx,
        [(frps.clone(), vec!["a=1".to_string()]), (frpc.clone(), vec!["b=2".to_string()])],
        |_| {
            body_ran = true;
            Ok::<_, HarnessError>(())
        },
    )
    .unwrap_err();

    assert!(matches!(err, HarnessError::EvaluatorUnavailable { .. }));
    assert!(!body_ran);
    assert_eq!(read(frps.path()), FRPS_K);
    assert_no_backup(frps.path());
    assert_no_backup(frpc.path());
}

#[test]
fn missing_file_fails_backup_before_any_override() {
    let fx = fixture(FakeEvaluator::new());
    let frps = KFile::new(fx.apps.join("frp/frps.k"));
    let missing = KFile::new(fx.apps.join("frp/missing.k"));

    let err = with_overrides(
        &fx.ctx,
        [(frps.clone(), vec!["a=1".to_string()]), (missing, vec!["b=2".to_string()])],
        |_| Ok::<_, HarnessError>(()),
    )
    .unwrap_err();

    assert!(matches!(err, HarnessError::BackupFailed { .. }));
    assert_eq!(read(frps.path()), FRPS_K);
    assert_no_backup(frps.path());
}

#[test]
fn stale_backup_or_duplicate_is_a_conflict() {
    let fx = fixture(FakeEvaluator::new());
    let frps = KFile::new(fx.apps.join("frp/frps.k"));

    let err = with_overrides(
        &fx.ctx,
        [(frps.clone(), vec![]), (frps.clone(), vec![])],
        |_| Ok::<_, HarnessError>(()),
    )
    .unwrap_err();
    assert!(matches!(err, HarnessError::OverrideConflict { .. }));

    let stale = backup_path(frps.path(), ".bak");
    fs::write(&stale, "stale").unwrap();
    let err = with_overrides(&fx.ctx, [(frps.clone(), vec![])], |_| Ok::<_, HarnessError>(()))
        .unwrap_err();
    assert!(matches!(err, HarnessError::OverrideConflict { .. }));
    assert_eq!(read(&stale), "stale");
    assert_eq!(read(frps.path()), FRPS_K);
}

#[test]
fn same_file_under_two_spellings_is_a_conflict() {
    let fx = fixture(FakeEvaluator::new());
    let direct = KFile::new(fx.apps.join("frp/frps.k"));
    let dotted = KFile::new(fx.apps.join("base/../frp/frps.k"));

    let err = with_overrides(
        &fx.ctx,
        [
            (direct.clone(), vec!["bindPort=7001".to_string()]),
            (dotted, vec!["bindPort=7002".to_string()]),
        ],
        |_| Ok::<_, HarnessError>(()),
    )
    .unwrap_err();
    assert!(matches!(err, HarnessError::OverrideConflict { .. }));
    assert_eq!(read(direct.path()), FRPS_K);
    assert_no_backup(direct.path());
}

#[test]
fn guard_restores_on_drop() {
    let fx = fixture(FakeEvaluator::new());
    let frpc = KFile::new(fx.apps.join("frp/frpc.k"));

    {
        let (guard, results) =
            OverrideGuard::begin(&fx.ctx, [(frpc.clone(), vec!["serverPort=9000".to_string()])])
                .unwrap();
        assert!(results.all_applied());
        assert_eq!(guard.paths().collect::<Vec<_>>(), vec![frpc.path()]);
        assert!(read(frpc.path()).ends_with("serverPort = 9000\n"));
    }

    assert_eq!(read(frpc.path()), FRPC_K);
    assert_no_backup(frpc.path());
}

#[test]
fn restore_detects_tampered_backup() {
    let fx = fixture(FakeEvaluator::new());
    let frpc = KFile::new(fx.apps.join("frp/frpc.k"));

    let err = with_overrides(&fx.ctx, [(frpc.clone(), vec!["x=1".to_string()])], |_| {
        fs::write(backup_path(frpc.path(), ".bak"), "tampered\n").unwrap();
        Ok::<_, HarnessError>(())
    })
    .unwrap_err();

    assert!(matches!(err, HarnessError::RestoreFailed { .. }));
}
