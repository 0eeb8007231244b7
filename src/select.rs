//! Case selection: which catalog files a declared test runs against.
//!
//! The two strategies order their results differently. Single-file selection
//! keeps catalog order. Named-group selection keeps the order of the
//! requested names, since that order decides which file binds to which
//! parameter.

use crate::catalog::{KFile, KFilter};
use crate::errors::{HarnessError, Result};
use crate::metadata::TestMetadata;

/// Files chosen for one declared test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// One case per file, in catalog order.
    SingleFile(Vec<KFile>),
    /// One case binding every file, in requested order.
    NamedGroup(Vec<KFile>),
    /// No expansion metadata; the test runs unexpanded.
    Unexpanded,
}

/// Catalog files accepted by `filter`, in catalog order.
///
/// Fails with [`HarnessError::NoFilesMatched`] when nothing is accepted.
pub fn select_single_file_cases(test: &str, catalog: &[KFile], filter: &KFilter) -> Result<Vec<KFile>> {
    let matched: Vec<KFile> = catalog.iter().filter(|kf| filter(kf)).cloned().collect();
    if matched.is_empty() {
        return Err(HarnessError::NoFilesMatched {
            test: test.to_string(),
        });
    }
    Ok(matched)
}

/// Resolves each requested base name among the catalog files accepted by
/// `group_filter`.
///
/// The first accepted file with a matching name wins. Fails with
/// [`HarnessError::NamedFileNotFound`] for the first name with no match.
pub fn select_named_group_cases(
    test: &str,
    catalog: &[KFile],
    filenames: &[String],
    group_filter: &KFilter,
) -> Result<Vec<KFile>> {
    let filtered: Vec<&KFile> = catalog.iter().filter(|kf| group_filter(kf)).collect();

    filenames
        .iter()
        .map(|filename| {
            filtered
                .iter()
                .find(|kf| kf.file_name() == Some(filename.as_str()))
                .map(|kf| (*kf).clone())
                .ok_or_else(|| HarnessError::NamedFileNotFound {
                    test: test.to_string(),
                    filename: filename.clone(),
                })
        })
        .collect()
}

/// Applies whichever mode `metadata` declares, single-file first.
pub fn select(test: &str, metadata: &TestMetadata, catalog: &[KFile]) -> Result<Selection> {
    if let Some(filter) = metadata.single_filter() {
        return select_single_file_cases(test, catalog, filter).map(Selection::SingleFile);
    }
    if metadata.use_named_group_tests() {
        if let Some(filter) = metadata.group_filter() {
            return select_named_group_cases(test, catalog, metadata.group_filenames(), filter)
                .map(Selection::NamedGroup);
        }
    }
    Ok(Selection::Unexpanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::kfilter;

    fn files(paths: &[&str]) -> Vec<KFile> {
        paths.iter().map(KFile::new).collect()
    }

    fn names(files: &[KFile]) -> Vec<&str> {
        files.iter().filter_map(KFile::file_name).collect()
    }

    #[test]
    fn test_single_file_keeps_catalog_order() {
        let catalog = files(&["/p/a.k", "/p/b.k", "/p/c.k"]);
        let filter = kfilter(|kf| {
            kf.file_name()
                .is_some_and(|n| n.starts_with('b') || n.starts_with('c'))
        });
        let matched = select_single_file_cases("t", &catalog, &filter).unwrap();
        assert_eq!(names(&matched), vec!["b.k", "c.k"]);
    }

    #[test]
    fn test_single_file_empty_is_error() {
        let catalog = files(&["/p/a.k"]);
        let err = select_single_file_cases("t", &catalog, &kfilter(|_| false)).unwrap_err();
        assert!(matches!(err, HarnessError::NoFilesMatched { test } if test == "t"));
    }

    #[test]
    fn test_named_group_keeps_requested_order() {
        let catalog = files(&["/p/g/Y.k", "/p/g/X.k", "/p/other/X.k"]);
        let filter = kfilter(|kf| kf.has_component("g"));
        let requested = vec!["X.k".to_string(), "Y.k".to_string()];
        let matched = select_named_group_cases("t", &catalog, &requested, &filter).unwrap();
        assert_eq!(matched, files(&["/p/g/X.k", "/p/g/Y.k"]));
    }

    #[test]
    fn test_named_group_filter_applies_first() {
        let catalog = files(&["/p/other/Z.k", "/p/g/X.k"]);
        let filter = kfilter(|kf| kf.has_component("g"));
        let requested = vec!["X.k".to_string(), "Z.k".to_string()];
        let err = select_named_group_cases("t", &catalog, &requested, &filter).unwrap_err();
        assert!(matches!(err, HarnessError::NamedFileNotFound { filename, .. } if filename == "Z.k"));
    }
}
