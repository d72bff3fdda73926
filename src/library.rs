//! In-memory index of external Python libraries.
//!
//! Libraries are indexed on request, kept for the life of the process, and
//! only replaced by an explicit re-index. A re-index builds the new table off
//! to the side and swaps the `Arc` in, so concurrent searches see either the
//! old table or the new one.

use crate::definition::{Definition, DefinitionKind, TypeFilter};
use crate::index::search::{search, SearchOptions, SearchResponse};
use crate::ts;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("library '{name}' not found in search paths {searched:?}")]
    NotFound { name: String, searched: Vec<PathBuf> },

    #[error("library '{name}' not indexed (indexed: {indexed:?})")]
    NotIndexed { name: String, indexed: Vec<String> },

    #[error("invalid library name '{0}'")]
    InvalidName(String),
}

/// Source of a library's definitions.
pub trait LibraryIntrospector: Send + Sync {
    fn introspect(&self, name: &str, include_private: bool)
        -> Result<Vec<Definition>, LibraryError>;
}

/// Finds `<path>/<name>/` packages or `<path>/<name>.py` modules on disk and
/// parses them with the syntax indexer.
#[derive(Debug, Clone, Default)]
pub struct SourceTreeIntrospector {
    search_paths: Vec<PathBuf>,
}

impl SourceTreeIntrospector {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Resolve a (possibly dotted) library name to `(search_path, location)`.
    fn locate(&self, name: &str) -> Option<(PathBuf, PathBuf)> {
        let relative: PathBuf = name.split('.').collect();
        self.search_paths.iter().find_map(|base| {
            let package = base.join(&relative);
            if package.is_dir() {
                return Some((base.clone(), package));
            }
            let module = base.join(&relative).with_extension("py");
            module.is_file().then(|| (base.clone(), module))
        })
    }
}

fn valid_library_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'))
}

/// Private by convention: leading underscore, dunder names excepted.
fn is_private(name: &str) -> bool {
    name.starts_with('_') && !(name.starts_with("__") && name.ends_with("__") && name.len() > 4)
}

fn python_files(location: &Path) -> Vec<PathBuf> {
    if location.is_file() {
        return vec![location.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(location)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != "__pycache__")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "py"))
        .collect();
    files.sort();
    files
}

impl LibraryIntrospector for SourceTreeIntrospector {
    fn introspect(
        &self,
        name: &str,
        include_private: bool,
    ) -> Result<Vec<Definition>, LibraryError> {
        if !valid_library_name(name) {
            return Err(LibraryError::InvalidName(name.to_string()));
        }
        let (base, location) = self.locate(name).ok_or_else(|| LibraryError::NotFound {
            name: name.to_string(),
            searched: self.search_paths.clone(),
        })?;

        let mut definitions = Vec::new();
        let mut skipped = 0usize;
        for path in python_files(&location) {
            let relative = path.strip_prefix(&base).unwrap_or(&path).to_path_buf();
            match ts::index_file(&base, &relative) {
                Ok(symbols) => definitions.extend(
                    symbols
                        .definitions
                        .into_iter()
                        .filter(|def| include_private || !is_private(&def.name)),
                ),
                Err(err) => {
                    skipped += 1;
                    tracing::debug!(error = %err, "skipping library file");
                }
            }
        }

        if skipped > 0 {
            tracing::warn!(library = name, skipped, "some library files failed to parse");
        }
        Ok(definitions)
    }
}

/// One indexed library.
#[derive(Debug, Clone)]
pub struct LibraryTable {
    pub name: String,
    pub include_private: bool,
    pub definitions: Vec<Definition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibrarySummary {
    pub library_name: String,
    pub total_definitions: usize,
    pub functions: usize,
    pub classes: usize,
    pub variables: usize,
    pub imports: usize,
    pub include_private: bool,
}

impl LibraryTable {
    pub fn summary(&self) -> LibrarySummary {
        let count = |kind: DefinitionKind| {
            self.definitions
                .iter()
                .filter(|def| def.kind() == kind)
                .count()
        };
        LibrarySummary {
            library_name: self.name.clone(),
            total_definitions: self.definitions.len(),
            functions: count(DefinitionKind::Function),
            classes: count(DefinitionKind::Class),
            variables: count(DefinitionKind::Variable),
            imports: count(DefinitionKind::Import),
            include_private: self.include_private,
        }
    }
}

/// Process-wide cache of library tables keyed by name.
#[derive(Debug, Default)]
pub struct LibraryIndex {
    tables: RwLock<HashMap<String, Arc<LibraryTable>>>,
}

impl LibraryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Introspect `name` and replace any previous table for it.
    pub fn index_library(
        &self,
        name: &str,
        include_private: bool,
        introspector: &dyn LibraryIntrospector,
    ) -> Result<LibrarySummary, LibraryError> {
        let definitions = introspector.introspect(name, include_private)?;
        let table = Arc::new(LibraryTable {
            name: name.to_string(),
            include_private,
            definitions,
        });
        let summary = table.summary();
        self.tables.write().insert(name.to_string(), table);

        tracing::info!(
            library = name,
            definitions = summary.total_definitions,
            "indexed library"
        );
        Ok(summary)
    }

    pub fn search(
        &self,
        name: &str,
        query: &str,
        type_filter: TypeFilter,
        max_results: usize,
    ) -> Result<SearchResponse, LibraryError> {
        let table = self.table(name).ok_or_else(|| LibraryError::NotIndexed {
            name: name.to_string(),
            indexed: self.indexed_libraries(),
        })?;
        let options = SearchOptions {
            type_filter,
            context_file: None,
            max_results,
        };
        Ok(search(&table.definitions, query, &options))
    }

    pub fn table(&self, name: &str) -> Option<Arc<LibraryTable>> {
        self.tables.read().get(name).cloned()
    }

    /// Names of indexed libraries, sorted.
    pub fn indexed_libraries(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn summary(&self, name: &str) -> Option<LibrarySummary> {
        self.table(name).map(|table| table.summary())
    }

    pub fn summaries(&self) -> Vec<LibrarySummary> {
        self.indexed_libraries()
            .iter()
            .filter_map(|name| self.summary(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn site_packages() -> TempDir {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("demo");
        fs::create_dir_all(pkg.join("__pycache__")).unwrap();
        fs::write(
            pkg.join("__init__.py"),
            "from .core import Client\n\nVERSION = \"1.0\"\n",
        )
        .unwrap();
        fs::write(
            pkg.join("core.py"),
            "class Client:\n    def __init__(self):\n        pass\n\n    def _secret(self):\n        pass\n\ndef _helper():\n    pass\n",
        )
        .unwrap();
        fs::write(pkg.join("broken.py"), "def x(:\n").unwrap();
        fs::write(pkg.join("__pycache__/core.cpython-312.py"), "def cached():\n    pass\n").unwrap();
        fs::write(dir.path().join("single.py"), "def only():\n    pass\n").unwrap();
        dir
    }

    #[test]
    fn indexes_package_without_private_names() {
        let site = site_packages();
        let introspector = SourceTreeIntrospector::new(vec![site.path().to_path_buf()]);
        let index = LibraryIndex::new();

        let summary = index.index_library("demo", false, &introspector).unwrap();
        assert_eq!(summary.classes, 1);
        assert_eq!(summary.functions, 1); // __init__ kept, _secret and _helper dropped
        assert_eq!(summary.variables, 1);
        assert_eq!(summary.imports, 1);
        assert!(!summary.include_private);

        let table = index.table("demo").unwrap();
        assert!(table.definitions.iter().all(|d| d.name != "cached"));
        assert!(table
            .definitions
            .iter()
            .any(|d| d.file == Path::new("demo/core.py")));
    }

    #[test]
    fn include_private_keeps_everything() {
        let site = site_packages();
        let introspector = SourceTreeIntrospector::new(vec![site.path().to_path_buf()]);
        let index = LibraryIndex::new();
        let summary = index.index_library("demo", true, &introspector).unwrap();
        assert_eq!(summary.functions, 3);
    }

    #[test]
    fn single_module_library() {
        let site = site_packages();
        let introspector = SourceTreeIntrospector::new(vec![site.path().to_path_buf()]);
        let index = LibraryIndex::new();
        index.index_library("single", false, &introspector).unwrap();

        let response = index.search("single", "only", TypeFilter::Any, 10).unwrap();
        assert!(response.found);
        assert_eq!(response.matches[0].definition.file, PathBuf::from("single.py"));
    }

    #[test]
    fn search_requires_indexed_library() {
        let index = LibraryIndex::new();
        let err = index.search("missing", "x", TypeFilter::Any, 10).unwrap_err();
        assert!(matches!(err, LibraryError::NotIndexed { .. }));
    }

    #[test]
    fn unknown_and_invalid_names() {
        let site = site_packages();
        let introspector = SourceTreeIntrospector::new(vec![site.path().to_path_buf()]);
        assert!(matches!(
            introspector.introspect("nope", false),
            Err(LibraryError::NotFound { .. })
        ));
        assert!(matches!(
            introspector.introspect("../etc", false),
            Err(LibraryError::InvalidName(_))
        ));
    }

    #[test]
    fn indexed_libraries_are_sorted_and_reindex_replaces() {
        let site = site_packages();
        let introspector = SourceTreeIntrospector::new(vec![site.path().to_path_buf()]);
        let index = LibraryIndex::new();
        index.index_library("single", false, &introspector).unwrap();
        index.index_library("demo", false, &introspector).unwrap();
        assert_eq!(index.indexed_libraries(), vec!["demo", "single"]);

        let before = index.summary("demo").unwrap();
        let after = index.index_library("demo", true, &introspector).unwrap();
        assert!(after.total_definitions > before.total_definitions);
        assert_eq!(index.summaries().len(), 2);
    }
}
