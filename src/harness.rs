//! Session and suite runner for KCL-driven tests.
//!
//! Plays the part of the host test framework:
//! 1. **Session**: locate the project anchor and build the catalog once.
//! 2. **Collection**: expand every declared test into cases.
//! 3. **Execution**: run each case body with its bound files, a scratch
//!    directory, and the shared execution context.
//! 4. **Reporting**: coloured per-case lines and a summary.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use kcl_harness::config::HarnessConfig;
//! use kcl_harness::context::{ExecutionContext, LazyContext};
//! use kcl_harness::harness::{Session, Suite};
//! use kcl_harness::metadata::Declaration;
//!
//! # fn main() -> kcl_harness::Result<()> {
//! let config = HarnessConfig::load(Path::new("."))?;
//! let session = Session::new(config.clone(), Path::new("."))?;
//! let ctx = LazyContext::new(move || ExecutionContext::from_config(&config, Path::new(".")));
//!
//! let mut suite = Suite::new();
//! suite.register(
//!     Declaration::new("check_has_export").single_file(|kf| kf.has_component("base")),
//!     |args| {
//!         let content = args.file("kf")?.read_to_string()?;
//!         miette::ensure!(content.contains("manifests.yaml_stream("), "must export something");
//!         Ok(())
//!     },
//! );
//! let report = suite.run(&session, &ctx, None);
//! std::process::exit(if report.success() { 0 } else { 1 });
//! # }
//! ```

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::anchor;
use crate::catalog::{Catalog, GlobPattern, KFile};
use crate::collect::{self, Expansion};
use crate::config::HarnessConfig;
use crate::context::{ExecutionContext, LazyContext};
use crate::errors::{ErrorScope, HarnessError, Result};
use crate::metadata::{Declaration, MetadataRegistry};

// =============================================================================
// SESSION
// =============================================================================

/// Per-run state built once: configuration, project anchor, and catalog.
#[derive(Debug, Clone)]
pub struct Session {
    config: HarnessConfig,
    project_root: PathBuf,
    catalog: Catalog,
}

impl Session {
    /// Locates the project anchor above `start` and discovers the catalog.
    #[tracing::instrument(skip_all, fields(start = %start.display()))]
    pub fn new(config: HarnessConfig, start: &Path) -> Result<Self> {
        let project_root = anchor::locate(start, &config.project_marker)?;
        let pattern = GlobPattern::new(&config.glob)?;
        let catalog = Catalog::discover(&project_root, &pattern)?;
        tracing::debug!(files = catalog.len(), "built catalog");
        Ok(Self {
            config,
            project_root,
            catalog,
        })
    }

    /// A session over an already built catalog.
    pub fn with_catalog(config: HarnessConfig, project_root: impl Into<PathBuf>, catalog: Catalog) -> Self {
        Self {
            config,
            project_root: project_root.into(),
            catalog,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

// =============================================================================
// CASE ARGUMENTS
// =============================================================================

/// Everything a case body may ask for.
pub struct CaseArgs<'a> {
    name: &'a str,
    bindings: &'a [(String, KFile)],
    tmp: TempDir,
    ctx: &'a LazyContext,
}

impl CaseArgs<'_> {
    /// Display name of the running case, e.g. `check[apps/main.k]`.
    pub fn name(&self) -> &str {
        self.name
    }

    /// File bound to `param`.
    pub fn file(&self, param: &str) -> Result<&KFile> {
        self.bindings
            .iter()
            .find(|(name, _)| name == param)
            .map(|(_, kf)| kf)
            .ok_or_else(|| HarnessError::InvalidMetadata {
                test: self.name.to_string(),
                message: format!("no file is bound to parameter '{param}'"),
            })
    }

    /// Every bound file, in parameter order.
    pub fn files(&self) -> impl Iterator<Item = &KFile> {
        self.bindings.iter().map(|(_, kf)| kf)
    }

    /// Fresh scratch directory, removed when the case finishes.
    pub fn tmp_path(&self) -> &Path {
        self.tmp.path()
    }

    /// The shared execution context, built on first use.
    pub fn context(&self) -> Result<&ExecutionContext> {
        self.ctx.get()
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of one case, or of collecting one declared test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed { name: String },
    Failed { name: String, error: String },
    /// Expansion failed; none of the test's cases ran.
    CollectionError { test: String, error: String },
    Skipped { name: String, reason: String },
}

impl TestOutcome {
    pub fn name(&self) -> &str {
        match self {
            Self::Passed { name } | Self::Failed { name, .. } | Self::Skipped { name, .. } => name,
            Self::CollectionError { test, .. } => test,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::CollectionError { .. })
    }
}

/// Outcomes of one suite run, in execution order.
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub outcomes: Vec<TestOutcome>,
}

impl SuiteReport {
    /// `(passed, failed, skipped)`; collection errors count as failed.
    pub fn counts(&self) -> (usize, usize, usize) {
        let passed = self
            .outcomes
            .iter()
            .filter(|o| matches!(o, TestOutcome::Passed { .. }))
            .count();
        let failed = self.outcomes.iter().filter(|o| o.is_failure()).count();
        let skipped = self
            .outcomes
            .iter()
            .filter(|o| matches!(o, TestOutcome::Skipped { .. }))
            .count();
        (passed, failed, skipped)
    }

    pub fn success(&self) -> bool {
        !self.outcomes.iter().any(TestOutcome::is_failure)
    }

    /// Prints every outcome and a summary to stderr.
    pub fn print(&self, use_colors: bool) -> io::Result<()> {
        let choice = if use_colors {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };
        let mut stderr = StandardStream::stderr(choice);
        self.write_to(&mut stderr)
    }

    pub fn write_to<W: WriteColor>(&self, out: &mut W) -> io::Result<()> {
        for outcome in &self.outcomes {
            match outcome {
                TestOutcome::Passed { name } => {
                    label(out, "PASS", Color::Green)?;
                    writeln!(out, " {name}")?;
                }
                TestOutcome::Failed { name, error } => {
                    label(out, "FAIL", Color::Red)?;
                    writeln!(out, " {name}")?;
                    for line in error.lines() {
                        writeln!(out, "  {line}")?;
                    }
                }
                TestOutcome::CollectionError { test, error } => {
                    label(out, "ERROR", Color::Red)?;
                    writeln!(out, " {test} (collection)")?;
                    writeln!(out, "  {error}")?;
                }
                TestOutcome::Skipped { name, reason } => {
                    label(out, "SKIP", Color::Yellow)?;
                    writeln!(out, " {name} ({reason})")?;
                }
            }
        }

        let (passed, failed, skipped) = self.counts();
        writeln!(out)?;
        write!(out, "Test summary: total {}, ", self.outcomes.len())?;
        label(out, "passed", Color::Green)?;
        write!(out, " {passed}, ")?;
        label(out, "failed", Color::Red)?;
        write!(out, " {failed}, ")?;
        label(out, "skipped", Color::Yellow)?;
        writeln!(out, " {skipped}")?;

        if failed > 0 {
            writeln!(out, "\nFailed tests:")?;
            for outcome in self.outcomes.iter().filter(|o| o.is_failure()) {
                writeln!(out, "  - {}", outcome.name())?;
            }
        }
        Ok(())
    }
}

fn label<W: WriteColor>(out: &mut W, text: &str, color: Color) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true))?;
    write!(out, "{text}")?;
    out.reset()
}

// =============================================================================
// SUITE
// =============================================================================

/// Body of a declared test.
pub type TestBody = Arc<dyn Fn(&CaseArgs<'_>) -> miette::Result<()> + Send + Sync>;

struct RegisteredTest {
    name: String,
    body: TestBody,
}

/// Collection result for one declared test.
#[derive(Debug)]
pub struct Collected {
    pub test: String,
    pub expansion: Result<Expansion>,
}

/// A set of declared tests and their metadata side-table.
#[derive(Default)]
pub struct Suite {
    registry: MetadataRegistry,
    tests: Vec<RegisteredTest>,
}

impl Suite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a test. A second declaration with the same name replaces
    /// the first.
    pub fn register<F>(&mut self, declaration: Declaration, body: F) -> &mut Self
    where
        F: Fn(&CaseArgs<'_>) -> miette::Result<()> + Send + Sync + 'static,
    {
        let name = declaration.register(&self.registry);
        let body: TestBody = Arc::new(body);
        match self.tests.iter_mut().find(|t| t.name == name) {
            Some(existing) => existing.body = body,
            None => self.tests.push(RegisteredTest { name, body }),
        }
        self
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    /// Names of the declared tests, in declaration order.
    pub fn test_names(&self) -> impl Iterator<Item = &str> {
        self.tests.iter().map(|t| t.name.as_str())
    }

    /// Expands every declared test against the session catalog.
    pub fn collect(&self, session: &Session) -> Vec<Collected> {
        self.tests
            .iter()
            .map(|test| Collected {
                test: test.name.clone(),
                expansion: collect::collect(
                    &test.name,
                    &self.registry,
                    session.catalog(),
                    session.config(),
                    Some(session.project_root()),
                ),
            })
            .collect()
    }

    /// Collects and runs every case whose name contains `filter`.
    ///
    /// A collection error fails only its test. A fatal error from a body
    /// skips every case after it.
    pub fn run(&self, session: &Session, ctx: &LazyContext, filter: Option<&str>) -> SuiteReport {
        let mut report = SuiteReport::default();
        let mut aborted: Option<String> = None;

        for (test, collected) in self.tests.iter().zip(self.collect(session)) {
            let expansion = match collected.expansion {
                Ok(expansion) => expansion,
                Err(e) => {
                    tracing::debug!(test = %test.name, error = %e, "collection failed");
                    report.outcomes.push(TestOutcome::CollectionError {
                        test: test.name.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            for case in &expansion.cases {
                let name = case.display_name(&test.name);
                if let Some(reason) = skip_reason(&name, filter, aborted.as_deref()) {
                    report.outcomes.push(TestOutcome::Skipped { name, reason });
                    continue;
                }
                let outcome = run_case(&name, &test.body, &case.bindings, ctx);
                if let CaseResult::Fatal(ref error) = outcome {
                    aborted = Some(error.clone());
                }
                report.outcomes.push(outcome.into_outcome(name));
            }
        }
        report
    }
}

fn skip_reason(name: &str, filter: Option<&str>, aborted: Option<&str>) -> Option<String> {
    if let Some(error) = aborted {
        return Some(format!("session aborted: {}", first_line(error)));
    }
    match filter {
        Some(f) if !name.contains(f) => Some(format!("filtered out by substring: {f}")),
        _ => None,
    }
}

enum CaseResult {
    Passed,
    Failed(String),
    Fatal(String),
}

impl CaseResult {
    fn into_outcome(self, name: String) -> TestOutcome {
        match self {
            Self::Passed => TestOutcome::Passed { name },
            Self::Failed(error) | Self::Fatal(error) => TestOutcome::Failed { name, error },
        }
    }
}

fn run_case(name: &str, body: &TestBody, bindings: &[(String, KFile)], ctx: &LazyContext) -> CaseResult {
    let tmp = match tempfile::Builder::new().prefix("kcl-harness-").tempdir() {
        Ok(tmp) => tmp,
        Err(e) => return CaseResult::Failed(format!("could not create tmp_path: {e}")),
    };
    let args = CaseArgs {
        name,
        bindings,
        tmp,
        ctx,
    };

    tracing::debug!(case = name, "running");
    match panic::catch_unwind(AssertUnwindSafe(|| body(&args))) {
        Ok(Ok(())) => CaseResult::Passed,
        Ok(Err(report)) => {
            let error = format!("{report:?}");
            match report.downcast_ref::<HarnessError>() {
                Some(e) if e.scope() == ErrorScope::Fatal => CaseResult::Fatal(error),
                _ => CaseResult::Failed(error),
            }
        }
        Err(payload) => CaseResult::Failed(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use termcolor::Buffer;

    #[test]
    fn test_report_counts_collection_errors_as_failures() {
        let report = SuiteReport {
            outcomes: vec![
                TestOutcome::Passed { name: "a".into() },
                TestOutcome::CollectionError {
                    test: "b".into(),
                    error: "no KCL files matched for b".into(),
                },
                TestOutcome::Skipped {
                    name: "c".into(),
                    reason: "filtered".into(),
                },
            ],
        };
        assert_eq!(report.counts(), (1, 1, 1));
        assert!(!report.success());

        let mut buffer = Buffer::no_color();
        report.write_to(&mut buffer).unwrap();
        let text = String::from_utf8(buffer.into_inner()).unwrap();
        assert!(text.contains("ERROR b (collection)"));
        assert!(text.contains("Test summary: total 3, passed 1, failed 1, skipped 1"));
        assert!(text.contains("  - b"));
    }

    #[test]
    fn test_skip_reason_prefers_abort() {
        assert_eq!(skip_reason("t[x.k]", Some("x"), None), None);
        assert!(skip_reason("t[x.k]", Some("y"), None).is_some());
        assert!(skip_reason("t[x.k]", None, Some("boom\nmore"))
            .is_some_and(|r| r == "session aborted: boom"));
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let borrowed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(borrowed.as_ref()), "static");
    }
}
