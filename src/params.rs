//! Binding matched files to test parameters.

use crate::catalog::KFile;
use crate::errors::{HarnessError, Result};

/// Parameters of `declared` that can take a matched file: those the harness
/// can bind (`available`) and not reserved for fixtures (`exclude`), in
/// declaration order, cut to `matched` entries.
pub fn infer_group_argnames(
    declared: &[String],
    available: &[String],
    exclude: &[String],
    matched: usize,
) -> Vec<String> {
    declared
        .iter()
        .filter(|name| available.contains(name) && !exclude.contains(name))
        .take(matched)
        .cloned()
        .collect()
}

/// Fails with [`HarnessError::ArityMismatch`] unless every matched file has
/// exactly one parameter to bind to.
pub fn validate_group_arity(test: &str, argnames: &[String], matched: &[KFile]) -> Result<()> {
    if argnames.len() != matched.len() {
        return Err(HarnessError::ArityMismatch {
            test: test.to_string(),
            expected: argnames.len(),
            actual: matched.len(),
        });
    }
    Ok(())
}
