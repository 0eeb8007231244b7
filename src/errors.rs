//! kcl-harness error handling.
//!
//! Every failure in the crate is a [`HarnessError`]. Variants follow the
//! failure taxonomy of the harness: anchor lookup, evaluator state, per-file
//! evaluation, collection-time declaration errors, and the filesystem work of
//! the override transaction.
//!
//! Callers decide how far a failure reaches with [`HarnessError::scope`]:
//! collection errors drop one declared test, execution errors fail one case,
//! fatal errors end the session.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorScope {
    /// Aborts expansion of the one declared test that produced it.
    Collection,
    /// Fails the one test case that produced it.
    Execution,
    /// No further evaluator work can be trusted; the session stops.
    Fatal,
}

impl ErrorScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorScope::Collection => "collection",
            ErrorScope::Execution => "execution",
            ErrorScope::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified error type for every kcl-harness failure mode.
#[derive(Debug, Error, Diagnostic)]
pub enum HarnessError {
    #[error("could not find {marker} in {start} or any of its ancestors")]
    #[diagnostic(
        code(kcl_harness::anchor_not_found),
        help("create the marker file at the root of the tree or pass an explicit root")
    )]
    AnchorNotFound { marker: String, start: PathBuf },

    #[error("KCL dependency resolution failed for {manifest}:\n{message}")]
    #[diagnostic(code(kcl_harness::dependency_resolution))]
    DependencyResolutionFailed { manifest: PathBuf, message: String },

    #[error("KCL execution failed for {path}:\n{message}")]
    #[diagnostic(code(kcl_harness::evaluation))]
    EvaluationFailed { path: PathBuf, message: String },

    #[error("no KCL files matched for {test}")]
    #[diagnostic(
        code(kcl_harness::no_files_matched),
        help("a single-file test needs at least one matching file; check its filter")
    )]
    NoFilesMatched { test: String },

    #[error("file '{filename}' not found in filtered files")]
    #[diagnostic(code(kcl_harness::named_file_not_found))]
    NamedFileNotFound { test: String, filename: String },

    #[error("invalid metadata on {test}: {message}")]
    #[diagnostic(code(kcl_harness::invalid_metadata))]
    InvalidMetadata { test: String, message: String },

    #[error("{test} expects {expected} args but {actual} files were matched")]
    #[diagnostic(
        code(kcl_harness::arity_mismatch),
        help("declare one file parameter per requested filename")
    )]
    ArityMismatch {
        test: String,
        expected: usize,
        actual: usize,
    },

    #[error("could not run the KCL evaluator `{program}`: {message}")]
    #[diagnostic(
        code(kcl_harness::evaluator_unavailable),
        help("install kcl or point KCL_HARNESS_KCL at the binary")
    )]
    EvaluatorUnavailable { program: String, message: String },

    #[error("could not back up {path} to {backup}")]
    #[diagnostic(code(kcl_harness::backup))]
    BackupFailed {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not restore {path} from {backup}: {message}")]
    #[diagnostic(
        code(kcl_harness::restore),
        help("the original content is still in the backup file")
    )]
    RestoreFailed {
        path: PathBuf,
        backup: PathBuf,
        message: String,
    },

    #[error("override conflict on {path}: {message}")]
    #[diagnostic(code(kcl_harness::override_conflict))]
    OverrideConflict { path: PathBuf, message: String },

    #[error("invalid configuration in {path}: {message}")]
    #[diagnostic(code(kcl_harness::config))]
    Config { path: PathBuf, message: String },

    #[error("{tool} verify failed\nstdout: {stdout}\nstderr: {stderr}")]
    #[diagnostic(code(kcl_harness::verification))]
    VerificationFailed {
        tool: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("I/O error on {path}")]
    #[diagnostic(code(kcl_harness::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HarnessError {
    /// Wraps an `std::io::Error` with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns how far this failure reaches.
    pub fn scope(&self) -> ErrorScope {
        match self {
            HarnessError::AnchorNotFound { .. }
            | HarnessError::DependencyResolutionFailed { .. }
            | HarnessError::Config { .. } => ErrorScope::Fatal,

            HarnessError::NoFilesMatched { .. }
            | HarnessError::NamedFileNotFound { .. }
            | HarnessError::InvalidMetadata { .. }
            | HarnessError::ArityMismatch { .. } => ErrorScope::Collection,

            HarnessError::EvaluationFailed { .. }
            | HarnessError::EvaluatorUnavailable { .. }
            | HarnessError::BackupFailed { .. }
            | HarnessError::RestoreFailed { .. }
            | HarnessError::OverrideConflict { .. }
            | HarnessError::VerificationFailed { .. }
            | HarnessError::Io { .. } => ErrorScope::Execution,
        }
    }

    /// True for errors raised while expanding a declared test.
    pub fn is_collection_error(&self) -> bool {
        self.scope() == ErrorScope::Collection
    }
}
