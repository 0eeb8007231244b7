//! The kcl-harness command-line interface.
//!
//! This module is the entry point for all CLI commands and orchestrates the
//! library functions. Errors are rendered as miette reports and the process
//! exits with status 1.

use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use crate::anchor::{self, PROJECT_MARKER};
use crate::catalog::{self, GlobPattern, KFile};
use crate::cli::args::{Command, HarnessArgs};
use crate::config::HarnessConfig;
use crate::context::ExecutionContext;
use crate::errors::{HarnessError, Result};
use crate::evaluator::OverrideResult;
use crate::ids;
use crate::overrides::with_overrides;

pub mod args;
pub mod output;

/// The main entry point for the CLI.
pub fn run() {
    let args = HarnessArgs::parse();

    let result = load_config(args.config.as_deref()).and_then(|config| match args.command {
        Command::Root { marker, path } => handle_root(&config, marker.as_deref(), &path),
        Command::List { root, glob } => handle_list(&config, root, glob.as_deref()),
        Command::Exec { file } => handle_exec(&config, &file),
        Command::Vars { file } => handle_vars(&config, &file),
        Command::Override { file, specs, keep } => handle_override(&config, &file, specs, keep),
    });

    if let Err(e) = result {
        output::print_error(e);
        process::exit(1);
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().map_err(|e| HarnessError::io(".", e))
}

/// An explicit file wins; otherwise `kcl-harness.yaml` at the project root,
/// or defaults outside any project.
fn load_config(explicit: Option<&Path>) -> Result<HarnessConfig> {
    if let Some(path) = explicit {
        return Ok(HarnessConfig::from_file(path)?.with_env_overrides(env_lookup));
    }
    match anchor::locate(&current_dir()?, PROJECT_MARKER) {
        Ok(root) => HarnessConfig::load(&root),
        Err(HarnessError::AnchorNotFound { .. }) => {
            Ok(HarnessConfig::default().with_env_overrides(env_lookup))
        }
        Err(e) => Err(e),
    }
}

/// Handles the `root` subcommand.
fn handle_root(config: &HarnessConfig, marker: Option<&str>, path: &Path) -> Result<()> {
    let marker = marker.unwrap_or(&config.project_marker);
    let root = anchor::locate(path, marker)?;
    println!("{}", root.display());
    Ok(())
}

/// Handles the `list` subcommand.
fn handle_list(config: &HarnessConfig, root: Option<PathBuf>, glob: Option<&str>) -> Result<()> {
    let root = match root {
        Some(root) => root,
        None => anchor::locate(&current_dir()?, &config.project_marker)?,
    };
    let pattern = GlobPattern::new(glob.unwrap_or(&config.glob))?;
    let files = catalog::discover(&root, &pattern, |_| true)?;
    for id in ids::kfile_ids(&files, Some(&root)) {
        println!("{id}");
    }
    Ok(())
}

/// Handles the `exec` subcommand.
fn handle_exec(config: &HarnessConfig, file: &Path) -> Result<()> {
    let ctx = ExecutionContext::from_config(config, file)?;
    let result = ctx.exec(file)?;
    println!("{}", result.json_result.trim_end());
    Ok(())
}

/// Handles the `vars` subcommand.
fn handle_vars(config: &HarnessConfig, file: &Path) -> Result<()> {
    let ctx = ExecutionContext::from_config(config, file)?;
    let vars = ctx.list_variables(file)?;
    output::print_json(&vars).map_err(|e| HarnessError::io("<stdout>", e.into()))
}

/// Handles the `override` subcommand.
///
/// Without `--keep` the overrides are applied inside a transaction, the diff
/// of the materialized file is shown, and the original is restored.
fn handle_override(config: &HarnessConfig, file: &Path, specs: Vec<String>, keep: bool) -> Result<()> {
    let ctx = ExecutionContext::from_config(config, file)?;
    let kf = KFile::new(file);
    let before = kf.read_to_string()?;

    if keep {
        let result = ctx.override_file(kf.path(), &specs)?;
        output::print_override_result(&result, config.use_colors);
        output::print_diff(&before, &kf.read_to_string()?, config.use_colors);
        return check_applied(&kf, &result);
    }

    with_overrides(&ctx, [(kf.clone(), specs)], |results| {
        let after = kf.read_to_string()?;
        output::print_diff(&before, &after, config.use_colors);
        match results.get(&kf) {
            Some(result) => {
                output::print_override_result(result, config.use_colors);
                check_applied(&kf, result)
            }
            None => Ok(()),
        }
    })
}

fn check_applied(kf: &KFile, result: &OverrideResult) -> Result<()> {
    if result.result {
        return Ok(());
    }
    Err(HarnessError::EvaluationFailed {
        path: kf.path().to_path_buf(),
        message: result.parse_errors.join("\n"),
    })
}
