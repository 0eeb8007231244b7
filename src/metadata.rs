//! Expansion metadata for declared tests.
//!
//! A test states how it expands over the catalog when it is declared, through
//! a [`Declaration`]. Registering the declaration stores its [`TestMetadata`]
//! in a [`MetadataRegistry`] side-table keyed by test name; collection later
//! reads it back with [`MetadataRegistry::extract`].
//!
//! ## Modes
//!
//! - **Single file**: one case per catalog file accepted by a predicate.
//! - **Named group**: one case binding an explicit list of files, looked up
//!   by base name among the files accepted by a group predicate.
//!
//! A declaration with neither mode is valid and simply does not expand.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;

use crate::catalog::{kfilter, KFile, KFilter};
use crate::errors::{HarnessError, Result};

/// What a test declared about its expansion. Read-only once registered.
#[derive(Clone, Default)]
pub struct TestMetadata {
    single_filter: Option<KFilter>,
    group_filenames: Vec<String>,
    group_filter: Option<KFilter>,
    params: Vec<String>,
}

impl std::fmt::Debug for TestMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestMetadata")
            .field("single_filter", &self.single_filter.is_some())
            .field("group_filenames", &self.group_filenames)
            .field("group_filter", &self.group_filter.is_some())
            .field("params", &self.params)
            .finish()
    }
}

impl TestMetadata {
    pub fn use_single_file_tests(&self) -> bool {
        self.single_filter.is_some()
    }

    pub fn use_named_group_tests(&self) -> bool {
        !self.group_filenames.is_empty() && self.group_filter.is_some()
    }

    pub fn single_filter(&self) -> Option<&KFilter> {
        self.single_filter.as_ref()
    }

    pub fn group_filenames(&self) -> &[String] {
        &self.group_filenames
    }

    pub fn group_filter(&self) -> Option<&KFilter> {
        self.group_filter.as_ref()
    }

    /// Parameter names the test body takes, in declaration order.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    fn validate(&self, test: &str) -> Result<()> {
        let invalid = |message: String| HarnessError::InvalidMetadata {
            test: test.to_string(),
            message,
        };

        for name in &self.group_filenames {
            if name.is_empty() {
                return Err(invalid("group file names must not be empty".to_string()));
            }
            if name.contains('/') || name.contains('\\') {
                return Err(invalid(format!(
                    "group file '{name}' must be a base file name, not a path"
                )));
            }
        }

        let mut seen = HashSet::new();
        for param in &self.params {
            if param.is_empty() {
                return Err(invalid("parameter names must not be empty".to_string()));
            }
            if !seen.insert(param.as_str()) {
                return Err(invalid(format!("parameter '{param}' is declared twice")));
            }
        }

        if self.use_single_file_tests() && !self.group_filenames.is_empty() {
            tracing::warn!(test, "declares both single-file and named-group expansion; single-file wins");
        }
        Ok(())
    }
}

// =============================================================================
// DECLARATION BUILDER
// =============================================================================

/// Builder for a test's expansion metadata.
///
/// ```
/// use kcl_harness::metadata::{Declaration, MetadataRegistry};
///
/// let registry = MetadataRegistry::new();
/// Declaration::new("check_has_export")
///     .single_file(|kf| kf.has_component("base"))
///     .params(["kf"])
///     .register(&registry);
/// assert!(registry.extract("check_has_export").unwrap().use_single_file_tests());
/// ```
#[derive(Debug, Clone)]
pub struct Declaration {
    name: String,
    metadata: TestMetadata,
}

impl Declaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: TestMetadata::default(),
        }
    }

    /// Expand once per catalog file accepted by `filter`.
    pub fn single_file<F>(mut self, filter: F) -> Self
    where
        F: Fn(&KFile) -> bool + Send + Sync + 'static,
    {
        self.metadata.single_filter = Some(kfilter(filter));
        self
    }

    /// Expand once, binding the files named by `filenames` (base names, in
    /// parameter order) among those accepted by `filter`.
    pub fn named_group<I, S, F>(mut self, filenames: I, filter: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&KFile) -> bool + Send + Sync + 'static,
    {
        self.metadata.group_filenames = filenames.into_iter().map(Into::into).collect();
        self.metadata.group_filter = Some(kfilter(filter));
        self
    }

    /// Ordered parameter names of the test body.
    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &TestMetadata {
        &self.metadata
    }

    /// Stores the metadata in `registry` and returns the test name.
    pub fn register(self, registry: &MetadataRegistry) -> String {
        registry.insert(self.name.clone(), self.metadata);
        self.name
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Side-table from test name to declared metadata.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entries: Mutex<HashMap<String, TestMetadata>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the metadata of `name`.
    pub fn insert(&self, name: String, metadata: TestMetadata) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.insert(name.clone(), metadata).is_some() {
            tracing::debug!(test = %name, "replaced test metadata");
        }
    }

    /// Reads and validates the metadata of `name`.
    ///
    /// A name that was never registered has empty metadata, which does not
    /// expand.
    pub fn extract(&self, name: &str) -> Result<TestMetadata> {
        let metadata = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default();
        metadata.validate(name)?;
        Ok(metadata)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }
}

lazy_static! {
    /// Process-wide registry for declarations made outside a suite.
    pub static ref METADATA_REGISTRY: MetadataRegistry = MetadataRegistry::new();
}

/// [`MetadataRegistry::extract`] against [`METADATA_REGISTRY`].
pub fn extract(name: &str) -> Result<TestMetadata> {
    METADATA_REGISTRY.extract(name)
}
