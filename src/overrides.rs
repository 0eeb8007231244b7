//! Override transactions: apply overrides to files and put them back.
//!
//! A transaction backs up every file before the first override is applied,
//! applies the overrides in order, hands the collected diagnostics to the
//! caller, and then moves every backup back over its original in the same
//! order. Restoration happens on every exit path: normal return, early `?`,
//! or a panic unwinding through [`OverrideGuard`].
//!
//! The transaction assumes it is the only writer of its files while it is
//! open. It refuses a file listed twice, and a file whose backup path already
//! exists, since either means two transactions would fight over one backup.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::anchor;
use crate::catalog::KFile;
use crate::context::ExecutionContext;
use crate::errors::{HarnessError, Result};
use crate::evaluator::OverrideResult;

/// Override diagnostics in transaction order.
#[derive(Debug, Clone, Default)]
pub struct OverrideResults {
    entries: Vec<(KFile, OverrideResult)>,
}

impl OverrideResults {
    pub fn get(&self, file: &KFile) -> Option<&OverrideResult> {
        self.entries
            .iter()
            .find(|(kf, _)| kf == file)
            .map(|(_, result)| result)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KFile, &OverrideResult)> {
        self.entries.iter().map(|(kf, result)| (kf, result))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when the evaluator reports every override as applied.
    pub fn all_applied(&self) -> bool {
        self.entries.iter().all(|(_, result)| result.result)
    }
}

#[derive(Debug)]
struct Backup {
    path: PathBuf,
    backup: PathBuf,
    digest: Vec<u8>,
}

/// Holds the backups of an open transaction and restores them when
/// restored explicitly or dropped.
#[derive(Debug)]
pub struct OverrideGuard {
    backups: Vec<Backup>,
    restored: bool,
}

impl OverrideGuard {
    /// Backs up every file, then applies its overrides.
    ///
    /// If any backup fails nothing has been overridden yet: the backups taken
    /// so far are removed and the failure is returned. If an override fails,
    /// every file is restored before the failure is returned.
    #[tracing::instrument(skip_all)]
    pub fn begin<I>(ctx: &ExecutionContext, overrides: I) -> Result<(Self, OverrideResults)>
    where
        I: IntoIterator<Item = (KFile, Vec<String>)>,
    {
        let plan: Vec<(KFile, Vec<String>)> = overrides.into_iter().collect();
        check_plan(ctx, &plan)?;

        let mut guard = Self {
            backups: Vec::with_capacity(plan.len()),
            restored: false,
        };
        for (kf, _) in &plan {
            match take_backup(kf.path(), ctx.backup_suffix()) {
                Ok(backup) => guard.backups.push(backup),
                Err(e) => {
                    guard.discard_backups();
                    return Err(e);
                }
            }
        }

        let mut results = OverrideResults::default();
        for (kf, specs) in plan {
            match ctx.override_file(kf.path(), &specs) {
                Ok(result) => results.entries.push((kf, result)),
                Err(e) => {
                    if let Err(restore_err) = guard.restore() {
                        tracing::error!(error = %restore_err, "restore after failed override");
                    }
                    return Err(e);
                }
            }
        }
        Ok((guard, results))
    }

    /// Moves every backup back over its original, in transaction order.
    ///
    /// Every file is attempted even when an earlier one fails; the first
    /// failure is returned. Calling this twice is a no-op.
    pub fn restore(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;

        let mut first_failure = None;
        for backup in &self.backups {
            if let Err(e) = restore_one(backup) {
                tracing::error!(path = %backup.path.display(), error = %e, "restore failed");
                first_failure.get_or_insert(e);
            } else {
                tracing::debug!(path = %backup.path.display(), "restored");
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Paths held by this transaction, in order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.backups.iter().map(|b| b.path.as_path())
    }

    /// Drops backups without touching originals. Used only before any
    /// override has run.
    fn discard_backups(&mut self) {
        for backup in self.backups.drain(..) {
            if let Err(e) = fs::remove_file(&backup.backup) {
                tracing::warn!(backup = %backup.backup.display(), error = %e, "could not remove backup");
            }
        }
        self.restored = true;
    }
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        if !self.restored {
            if let Err(e) = self.restore() {
                tracing::error!(error = %e, "override transaction left a file unrestored");
            }
        }
    }
}

/// Runs `body` with `overrides` applied, restoring every file afterwards.
///
/// An error returned by `body` wins over a restoration failure, which is
/// then only logged. When `body` succeeds a restoration failure is returned.
///
/// ```no_run
/// use kcl_harness::{catalog::KFile, context, overrides::with_overrides};
///
/// # fn main() -> kcl_harness::Result<()> {
/// let ctx = context::instance()?;
/// let kf = KFile::new("apps/frp/FRPC_Config.k");
/// let json = with_overrides(ctx, [(kf.clone(), vec!["config.port=7001".into()])], |_| {
///     Ok::<_, kcl_harness::HarnessError>(ctx.exec(kf.path())?.json_result)
/// })?;
/// # let _ = json;
/// # Ok(())
/// # }
/// ```
pub fn with_overrides<I, F, T, E>(ctx: &ExecutionContext, overrides: I, body: F) -> std::result::Result<T, E>
where
    I: IntoIterator<Item = (KFile, Vec<String>)>,
    F: FnOnce(&OverrideResults) -> std::result::Result<T, E>,
    E: From<HarnessError>,
{
    let (mut guard, results) = OverrideGuard::begin(ctx, overrides)?;
    let outcome = body(&results);
    let restored = guard.restore();
    match (outcome, restored) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(restore_err)) => Err(restore_err.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(restore_err)) => {
            tracing::error!(error = %restore_err, "restore failed after an error inside the transaction");
            Err(e)
        }
    }
}

// =============================================================================
// FILESYSTEM STEPS
// =============================================================================

fn check_plan(ctx: &ExecutionContext, plan: &[(KFile, Vec<String>)]) -> Result<()> {
    let mut seen = HashSet::new();
    for (kf, _) in plan {
        let identity = match kf.path().canonicalize() {
            Ok(canonical) => canonical,
            Err(_) => anchor::absolute(kf.path())?,
        };
        if !seen.insert(identity) {
            return Err(HarnessError::OverrideConflict {
                path: kf.path().to_path_buf(),
                message: "file listed twice in one transaction".to_string(),
            });
        }
        let backup = backup_path(kf.path(), ctx.backup_suffix());
        if backup.exists() {
            return Err(HarnessError::OverrideConflict {
                path: kf.path().to_path_buf(),
                message: format!(
                    "backup {} already exists; another transaction may be open",
                    backup.display()
                ),
            });
        }
    }
    Ok(())
}

/// `path` with `suffix` appended to its final component.
pub fn backup_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn take_backup(path: &Path, suffix: &str) -> Result<Backup> {
    let backup = backup_path(path, suffix);
    let original = fs::read(path).map_err(|source| HarnessError::BackupFailed {
        path: path.to_path_buf(),
        backup: backup.clone(),
        source,
    })?;
    fs::copy(path, &backup).map_err(|source| HarnessError::BackupFailed {
        path: path.to_path_buf(),
        backup: backup.clone(),
        source,
    })?;
    tracing::debug!(path = %path.display(), backup = %backup.display(), "backed up");
    Ok(Backup {
        path: path.to_path_buf(),
        backup,
        digest: Sha256::digest(&original).to_vec(),
    })
}

fn restore_one(backup: &Backup) -> Result<()> {
    let failed = |message: String| HarnessError::RestoreFailed {
        path: backup.path.clone(),
        backup: backup.backup.clone(),
        message,
    };

    if fs::rename(&backup.backup, &backup.path).is_err() {
        fs::copy(&backup.backup, &backup.path).map_err(|e| failed(e.to_string()))?;
        fs::remove_file(&backup.backup).map_err(|e| failed(e.to_string()))?;
    }

    let restored = fs::read(&backup.path).map_err(|e| failed(e.to_string()))?;
    if Sha256::digest(&restored).to_vec() != backup.digest {
        return Err(failed("restored content differs from the original".to_string()));
    }
    Ok(())
}
