//! Test-case generation and configuration execution for KCL projects.
//!
//! Discovers KCL files below a project anchor, expands declared tests over
//! them, runs files through the KCL evaluator with a once-resolved dependency
//! set, and applies overrides to files under a transaction that always puts
//! the originals back.

pub use crate::errors::{ErrorScope, HarnessError, Result};

pub mod anchor;
pub mod catalog;
pub mod cli;
pub mod collect;
pub mod config;
pub mod context;
pub mod errors;
pub mod evaluator;
pub mod harness;
pub mod ids;
pub mod metadata;
pub mod overrides;
pub mod params;
pub mod select;
pub mod verify;
