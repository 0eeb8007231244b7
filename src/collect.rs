//! Expansion of one declared test into concrete cases.
//!
//! This is the per-test collection hook: extract metadata, select files,
//! infer argument names, validate arity, and attach identifiers. Every
//! failure here is a collection error for that test alone.

use std::path::Path;

use serde::Serialize;

use crate::catalog::{Catalog, KFile};
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, Result};
use crate::ids;
use crate::metadata::{MetadataRegistry, TestMetadata};
use crate::params::{infer_group_argnames, validate_group_arity};
use crate::select::{self, Selection};

/// One concrete invocation of a declared test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Case {
    /// Identifier within the test; empty for an unexpanded test.
    pub id: String,
    /// Parameter name and bound file, in parameter order.
    pub bindings: Vec<(String, KFile)>,
}

impl Case {
    /// `test[id]`, or the bare test name when the case has no id.
    pub fn display_name(&self, test: &str) -> String {
        if self.id.is_empty() {
            test.to_string()
        } else {
            format!("{test}[{}]", self.id)
        }
    }

    pub fn file(&self, param: &str) -> Option<&KFile> {
        self.bindings
            .iter()
            .find(|(name, _)| name == param)
            .map(|(_, kf)| kf)
    }
}

/// The cases generated for one declared test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Expansion {
    pub test: String,
    /// Parameters bound by every case, in binding order.
    pub argnames: Vec<String>,
    pub cases: Vec<Case>,
}

impl Expansion {
    fn unexpanded(test: &str) -> Self {
        Self {
            test: test.to_string(),
            argnames: Vec::new(),
            cases: vec![Case {
                id: String::new(),
                bindings: Vec::new(),
            }],
        }
    }

    pub fn is_expanded(&self) -> bool {
        !self.argnames.is_empty()
    }
}

/// Expands `test` using the metadata registered for it.
pub fn collect(
    test: &str,
    registry: &MetadataRegistry,
    catalog: &Catalog,
    config: &HarnessConfig,
    project_root: Option<&Path>,
) -> Result<Expansion> {
    let metadata = registry.extract(test)?;
    expand(test, &metadata, catalog, config, project_root)
}

/// Expands `test` over `catalog` according to `metadata`.
///
/// Single-file tests bind each file to [`HarnessConfig::single_file_param`]
/// and are identified by the file's path relative to `project_root`.
/// Named-group tests bind files to the declared parameters in order; a lone
/// parameter is identified by the base name, several share one case
/// identified by the joined base names.
#[tracing::instrument(skip_all, fields(test = %test))]
pub fn expand(
    test: &str,
    metadata: &TestMetadata,
    catalog: &Catalog,
    config: &HarnessConfig,
    project_root: Option<&Path>,
) -> Result<Expansion> {
    let expansion = match select::select(test, metadata, catalog.files())? {
        Selection::SingleFile(matched) => {
            let param = single_file_param(test, metadata, config)?;
            let ids = ids::kfile_ids(&matched, project_root);
            let cases = ids
                .into_iter()
                .zip(matched)
                .map(|(id, kf)| Case {
                    id,
                    bindings: vec![(param.clone(), kf)],
                })
                .collect();
            Expansion {
                test: test.to_string(),
                argnames: vec![param],
                cases,
            }
        }
        Selection::NamedGroup(matched) => {
            let declared = metadata.params();
            let argnames =
                infer_group_argnames(declared, declared, &config.excluded_params, matched.len());
            validate_group_arity(test, &argnames, &matched)?;
            let cases = if argnames.len() == 1 {
                matched
                    .into_iter()
                    .map(|kf| Case {
                        id: kf.file_name().unwrap_or_default().to_string(),
                        bindings: vec![(argnames[0].clone(), kf)],
                    })
                    .collect()
            } else {
                vec![Case {
                    id: ids::group_id(&matched),
                    bindings: argnames.iter().cloned().zip(matched).collect(),
                }]
            };
            Expansion {
                test: test.to_string(),
                argnames,
                cases,
            }
        }
        Selection::Unexpanded => Expansion::unexpanded(test),
    };
    tracing::debug!(
        argnames = ?expansion.argnames,
        cases = expansion.cases.len(),
        "expanded"
    );
    Ok(expansion)
}

fn single_file_param(test: &str, metadata: &TestMetadata, config: &HarnessConfig) -> Result<String> {
    let param = &config.single_file_param;
    let params = metadata.params();
    if params.is_empty() || params.contains(param) {
        return Ok(param.clone());
    }
    Err(HarnessError::InvalidMetadata {
        test: test.to_string(),
        message: format!("single-file tests must take a '{param}' parameter"),
    })
}
