//! Execution context: the evaluator handle plus its resolved dependency set.
//!
//! Dependency resolution is the one expensive step of talking to KCL, so it
//! runs exactly once per context. A session normally builds one context at
//! startup with [`ExecutionContext::from_config`] and passes it by reference
//! to every consumer. Code that cannot thread a reference through uses the
//! process-wide [`instance`], which constructs lazily under
//! [`LazyContext`].
//!
//! The dependency set is never mutated after construction; every operation
//! reads it.

use std::path::{Path, PathBuf};

use once_cell::sync::{Lazy, OnceCell};

use crate::anchor;
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, Result};
use crate::evaluator::{Evaluator, ExecResult, ExternalPkg, KclCli, OverrideResult, VariableMap};

/// Owns the evaluator and the external packages resolved for the KCL
/// workspace.
pub struct ExecutionContext {
    evaluator: Box<dyn Evaluator>,
    external_pkgs: Vec<ExternalPkg>,
    kcl_root: PathBuf,
    backup_suffix: String,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("external_pkgs", &self.external_pkgs)
            .field("kcl_root", &self.kcl_root)
            .field("backup_suffix", &self.backup_suffix)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Resolves dependencies for the workspace at `kcl_root` and keeps them.
    ///
    /// A non-empty error from the evaluator is fatal: it becomes
    /// [`HarnessError::DependencyResolutionFailed`].
    #[tracing::instrument(skip_all, fields(kcl_root = %kcl_root.display()))]
    pub fn initialize(evaluator: Box<dyn Evaluator>, kcl_root: &Path) -> Result<Self> {
        let resolution = evaluator.resolve_dependencies(kcl_root)?;
        if !resolution.err_message.is_empty() {
            return Err(HarnessError::DependencyResolutionFailed {
                manifest: kcl_root.to_path_buf(),
                message: resolution.err_message,
            });
        }
        tracing::info!(
            packages = resolution.external_pkgs.len(),
            "resolved KCL dependencies"
        );
        Ok(Self {
            evaluator,
            external_pkgs: resolution.external_pkgs,
            kcl_root: kcl_root.to_path_buf(),
            backup_suffix: HarnessConfig::default().backup_suffix,
        })
    }

    /// Locates the KCL workspace above `start` and initializes a context
    /// backed by the `kcl` command line.
    pub fn from_config(config: &HarnessConfig, start: &Path) -> Result<Self> {
        let kcl_root = anchor::locate(start, &config.kcl_marker)?;
        let context = Self::initialize(Box::new(KclCli::from_config(config)), &kcl_root)?;
        Ok(context.with_backup_suffix(&config.backup_suffix))
    }

    pub fn with_backup_suffix(mut self, suffix: &str) -> Self {
        self.backup_suffix = suffix.to_string();
        self
    }

    pub fn external_pkgs(&self) -> &[ExternalPkg] {
        &self.external_pkgs
    }

    pub fn kcl_root(&self) -> &Path {
        &self.kcl_root
    }

    pub fn backup_suffix(&self) -> &str {
        &self.backup_suffix
    }

    // =========================================================================
    // CONFIGURATION OPERATIONS
    // =========================================================================

    /// Runs the file at `path` with the resolved dependencies.
    ///
    /// Any error the evaluator reports is surfaced verbatim as
    /// [`HarnessError::EvaluationFailed`].
    pub fn exec(&self, path: &Path) -> Result<ExecResult> {
        let absolute = anchor::absolute(path)?;
        tracing::debug!(path = %absolute.display(), "exec");
        let result = self
            .evaluator
            .exec(std::slice::from_ref(&absolute), &self.external_pkgs)?;
        if !result.err_message.is_empty() {
            return Err(HarnessError::EvaluationFailed {
                path: absolute,
                message: result.err_message,
            });
        }
        Ok(result)
    }

    /// Applies `specs` to the file at `path` in place and returns the
    /// evaluator's diagnostic. Nothing is backed up; see
    /// [`crate::overrides::with_overrides`] for a reversible variant.
    pub fn override_file(&self, path: &Path, specs: &[String]) -> Result<OverrideResult> {
        let absolute = anchor::absolute(path)?;
        tracing::debug!(path = %absolute.display(), specs = specs.len(), "override");
        self.evaluator.override_file(&absolute, specs)
    }

    /// Variable inventory of the file at `path`, unvalidated.
    pub fn list_variables(&self, path: &Path) -> Result<VariableMap> {
        self.evaluator.list_variables(&[path.to_path_buf()])
    }
}

// =============================================================================
// LAZY, ONCE-ONLY CONSTRUCTION
// =============================================================================

/// A failed initialization, kept so later callers see the same failure.
#[derive(Debug, Clone)]
struct InitFailure {
    manifest: PathBuf,
    message: String,
}

impl InitFailure {
    fn from_error(error: HarnessError) -> Self {
        match error {
            HarnessError::DependencyResolutionFailed { manifest, message } => {
                Self { manifest, message }
            }
            other => Self {
                manifest: PathBuf::new(),
                message: other.to_string(),
            },
        }
    }
}

type ContextFactory = Box<dyn Fn() -> Result<ExecutionContext> + Send + Sync>;

/// Builds an [`ExecutionContext`] on first use, at most once.
///
/// Callers racing on the first access block until the single construction
/// finishes and then all observe the same context. Later accesses take the
/// unsynchronized fast path. A failed construction is remembered and replayed
/// rather than retried.
pub struct LazyContext {
    cell: OnceCell<std::result::Result<ExecutionContext, InitFailure>>,
    factory: ContextFactory,
}

impl LazyContext {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<ExecutionContext> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            factory: Box::new(factory),
        }
    }

    /// Returns the context, constructing it if this is the first access.
    pub fn get(&self) -> Result<&ExecutionContext> {
        let slot = self
            .cell
            .get_or_init(|| (self.factory)().map_err(InitFailure::from_error));
        match slot {
            Ok(context) => Ok(context),
            Err(failure) => Err(HarnessError::DependencyResolutionFailed {
                manifest: failure.manifest.clone(),
                message: failure.message.clone(),
            }),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

static GLOBAL: Lazy<LazyContext> = Lazy::new(|| LazyContext::new(default_context));

fn default_context() -> Result<ExecutionContext> {
    let cwd = std::env::current_dir().map_err(|e| HarnessError::io(".", e))?;
    let config = match anchor::find_project_root(&cwd) {
        Ok(project_root) => HarnessConfig::load(&project_root)?,
        Err(_) => HarnessConfig::default().with_env_overrides(|key| std::env::var(key).ok()),
    };
    ExecutionContext::from_config(&config, &cwd)
}

/// Process-wide context rooted at the KCL workspace above the working
/// directory.
pub fn instance() -> Result<&'static ExecutionContext> {
    GLOBAL.get()
}
