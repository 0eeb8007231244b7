//! Command-line arguments and subcommands for `kcl-harness`.
//!
//! Uses the `clap` crate with its "derive" feature.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// The main CLI argument structure.
#[derive(Debug, Parser)]
#[command(
    name = "kcl-harness",
    version,
    about = "Discover, run and temporarily override KCL configuration files."
)]
pub struct HarnessArgs {
    /// Configuration file to use instead of kcl-harness.yaml at the project root.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// An enumeration of all available CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the nearest ancestor directory containing a marker file.
    Root {
        /// Marker file name; defaults to the project marker.
        #[arg(long)]
        marker: Option<String>,
        /// Where to start searching.
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// List discovered KCL files by their stable ids.
    List {
        /// Directory to search; defaults to the project root.
        #[arg(long)]
        root: Option<PathBuf>,
        /// Glob pattern; defaults to the configured one.
        #[arg(long)]
        glob: Option<String>,
    },
    /// Run a KCL file and print its JSON result.
    Exec {
        #[arg(required = true)]
        file: PathBuf,
    },
    /// Print the variables declared by a KCL file.
    Vars {
        #[arg(required = true)]
        file: PathBuf,
    },
    /// Apply overrides to a KCL file and show the materialized change.
    Override {
        #[arg(required = true)]
        file: PathBuf,
        /// Override spec such as `config.port=7001`; repeatable.
        #[arg(short = 'O', long = "override", value_name = "SPEC", required = true)]
        specs: Vec<String>,
        /// Leave the file overridden instead of restoring it.
        #[arg(long)]
        keep: bool,
    },
}
