//! File-partitioned index of definitions and usages.
//!
//! Each indexed file owns one [`FileSymbols`] entry. Entries are only ever
//! replaced whole: a rebuild of a file produces a fresh entry off to the side
//! and [`ProjectIndex::commit`] swaps it in with a single map insert.

use crate::definition::{Definition, DefinitionKind, FileSymbols, Usage};
use crate::ts::{self, ParseError};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Extensions indexed when none are configured.
pub const DEFAULT_EXTENSIONS: &[&str] = &["py"];

/// Symbol table for one project root.
#[derive(Debug, Clone, Default)]
pub struct ProjectIndex {
    root: PathBuf,
    extensions: Vec<String>,
    files: IndexMap<PathBuf, FileSymbols>,
    failed: IndexMap<PathBuf, ParseError>,
}

/// Response of a full index build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildIndexResponse {
    pub files_indexed: usize,
    pub definitions: Vec<Definition>,
    pub failed_files: Vec<ParseError>,
}

/// Per-kind overview of one indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub file: PathBuf,
    pub definitions_found: usize,
    pub functions: Vec<String>,
    pub classes: Vec<String>,
    pub variables: Vec<String>,
    pub imports: Vec<String>,
}

/// Result of re-reading one file, computed without touching the index.
#[derive(Debug, Clone)]
pub enum FileReindex {
    Parsed(FileSymbols),
    Failed(ParseError),
    /// The file no longer exists on disk.
    Removed,
}

/// Whether `path` carries one of the indexed extensions.
pub fn is_eligible(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|allowed| allowed == ext))
}

/// Express `path` relative to `root` when it lives under it.
pub fn relative_to_root(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        if let Ok(stripped) = path.strip_prefix(root) {
            return stripped.to_path_buf();
        }
    }
    path.to_path_buf()
}

/// Parse `file` (relative to `root`) from disk.
pub fn reindex_file(root: &Path, file: &Path) -> FileReindex {
    if !root.join(file).exists() {
        return FileReindex::Removed;
    }
    match ts::index_file(root, file) {
        Ok(symbols) => FileReindex::Parsed(symbols),
        Err(err) => FileReindex::Failed(err),
    }
}

impl ProjectIndex {
    /// Empty index for `root` with the given extension filter.
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Self {
        let extensions = if extensions.is_empty() {
            DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
        } else {
            extensions.to_vec()
        };
        Self {
            root: root.into(),
            extensions,
            files: IndexMap::new(),
            failed: IndexMap::new(),
        }
    }

    /// Parse every eligible file in `files`. Failures are recorded, never fatal.
    pub fn build(root: impl Into<PathBuf>, files: &[PathBuf], extensions: &[String]) -> Self {
        let mut index = Self::new(root, extensions);
        for file in files {
            let relative = relative_to_root(&index.root, file);
            if !is_eligible(&relative, &index.extensions) {
                tracing::debug!(file = %relative.display(), "skipping non-indexed extension");
                continue;
            }
            match ts::index_file(&index.root, &relative) {
                Ok(symbols) => {
                    index.files.insert(relative, symbols);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "file failed to parse");
                    index.failed.insert(relative, err);
                }
            }
        }
        tracing::info!(
            root = %index.root.display(),
            files = index.files.len(),
            definitions = index.definition_count(),
            failed = index.failed.len(),
            "built project index"
        );
        index
    }

    /// Re-parse one file from disk and swap its entry.
    ///
    /// On a parse failure the previous entry is kept, the failure is recorded,
    /// and returned. Returns the new definition count otherwise. Files without
    /// an indexed extension are ignored, as a full build would.
    pub fn update(&mut self, file: &Path) -> Result<usize, ParseError> {
        let relative = relative_to_root(&self.root, file);
        if !is_eligible(&relative, &self.extensions) {
            tracing::debug!(file = %relative.display(), "skipping non-indexed extension");
            return Ok(0);
        }
        let outcome = reindex_file(&self.root, &relative);
        self.commit(relative, outcome)
    }

    /// Apply a precomputed [`FileReindex`] for `file`.
    pub fn commit(&mut self, file: PathBuf, outcome: FileReindex) -> Result<usize, ParseError> {
        match outcome {
            FileReindex::Parsed(symbols) => {
                let count = symbols.definitions.len();
                self.replace_file(file, symbols);
                Ok(count)
            }
            FileReindex::Failed(err) => {
                tracing::warn!(error = %err, "keeping previous entries after failed re-parse");
                self.failed.insert(file, err.clone());
                Err(err)
            }
            FileReindex::Removed => {
                tracing::debug!(file = %file.display(), "file removed from index");
                self.files.shift_remove(&file);
                self.failed.shift_remove(&file);
                Ok(0)
            }
        }
    }

    /// Replace a file's entry as a unit and clear any recorded failure.
    pub fn replace_file(&mut self, file: PathBuf, symbols: FileSymbols) {
        self.failed.shift_remove(&file);
        self.files.insert(file, symbols);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// All definitions, file order then source order.
    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.files.values().flat_map(|entry| entry.definitions.iter())
    }

    /// Definitions of one file; empty when the file is not indexed.
    pub fn file_definitions(&self, file: &Path) -> &[Definition] {
        let relative = relative_to_root(&self.root, file);
        self.files
            .get(&relative)
            .map(|entry| entry.definitions.as_slice())
            .unwrap_or(&[])
    }

    /// Names per kind for one file, qualified by scope.
    pub fn file_summary(&self, file: &Path) -> FileSummary {
        let definitions = self.file_definitions(file);
        let names = |kind: DefinitionKind| -> Vec<String> {
            definitions
                .iter()
                .filter(|def| def.kind() == kind)
                .map(Definition::qualified_name)
                .collect()
        };
        FileSummary {
            file: relative_to_root(&self.root, file),
            definitions_found: definitions.len(),
            functions: names(DefinitionKind::Function),
            classes: names(DefinitionKind::Class),
            variables: names(DefinitionKind::Variable),
            imports: names(DefinitionKind::Import),
        }
    }

    pub fn file_entry(&self, file: &Path) -> Option<&FileSymbols> {
        self.files.get(&relative_to_root(&self.root, file))
    }

    /// Usages of `name` across all indexed files.
    pub fn usages_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Usage> + 'a {
        self.files
            .values()
            .flat_map(|entry| entry.usages.iter())
            .filter(move |usage| usage.name == name)
    }

    pub fn failed_files(&self) -> impl Iterator<Item = &ParseError> {
        self.failed.values()
    }

    pub fn is_failed(&self, file: &Path) -> bool {
        self.failed.contains_key(&relative_to_root(&self.root, file))
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn definition_count(&self) -> usize {
        self.files.values().map(|entry| entry.definitions.len()).sum()
    }

    pub fn indexed_files(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    pub fn to_response(&self) -> BuildIndexResponse {
        BuildIndexResponse {
            files_indexed: self.files.len(),
            definitions: self.definitions().cloned().collect(),
            failed_files: self.failed.values().cloned().collect(),
        }
    }
}

/// Build a project index and return the `build_index` response with it.
pub fn build_index(
    root: &Path,
    files: &[PathBuf],
    extensions: &[String],
) -> (ProjectIndex, BuildIndexResponse) {
    let index = ProjectIndex::build(root, files, extensions);
    let response = index.to_response();
    (index, response)
}

/// Incrementally update `index` for `file`, consuming and returning it.
pub fn update_index(mut index: ProjectIndex, file: &Path) -> (ProjectIndex, Result<usize, ParseError>) {
    let outcome = index.update(file);
    (index, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn py() -> Vec<String> {
        vec!["py".to_string()]
    }

    fn project(files: &[(&str, &str)]) -> (TempDir, Vec<PathBuf>) {
        let dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, content).unwrap();
            paths.push(PathBuf::from(name));
        }
        (dir, paths)
    }

    #[test]
    fn build_records_failures_without_aborting() {
        let (dir, files) = project(&[
            ("a.py", "def a():\n    pass\n"),
            ("bad.py", "def broken(:\n"),
            ("notes.txt", "not python"),
            ("pkg/b.py", "class B:\n    pass\n"),
        ]);
        let index = ProjectIndex::build(dir.path(), &files, &py());

        assert_eq!(index.file_count(), 2);
        let names: Vec<&str> = index.definitions().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "B"]);

        let failed: Vec<&ParseError> = index.failed_files().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].file, PathBuf::from("bad.py"));
        assert_eq!(failed[0].line, Some(1));
    }

    #[test]
    fn duplicate_names_across_files_are_kept() {
        let (dir, files) = project(&[
            ("one.py", "def helper():\n    pass\n"),
            ("two.py", "def helper():\n    pass\n"),
        ]);
        let index = ProjectIndex::build(dir.path(), &files, &py());
        assert_eq!(index.definitions().filter(|d| d.name == "helper").count(), 2);
    }

    #[test]
    fn update_replaces_file_entries() {
        let (dir, files) = project(&[("m.py", "def old():\n    pass\n")]);
        let mut index = ProjectIndex::build(dir.path(), &files, &py());

        fs::write(dir.path().join("m.py"), "def new():\n    pass\n\nX = 1\n").unwrap();
        assert_eq!(index.update(Path::new("m.py")).unwrap(), 2);

        let names: Vec<&str> = index
            .file_definitions(Path::new("m.py"))
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["new", "X"]);
    }

    #[test]
    fn failed_update_keeps_previous_entries() {
        let (dir, files) = project(&[("m.py", "def keep():\n    pass\n")]);
        let mut index = ProjectIndex::build(dir.path(), &files, &py());

        fs::write(dir.path().join("m.py"), "def keep(:\n").unwrap();
        let err = index.update(Path::new("m.py")).unwrap_err();
        assert_eq!(err.file, PathBuf::from("m.py"));
        assert!(index.is_failed(Path::new("m.py")));
        assert_eq!(index.file_definitions(Path::new("m.py"))[0].name, "keep");

        fs::write(dir.path().join("m.py"), "def keep():\n    return 1\n").unwrap();
        index.update(Path::new("m.py")).unwrap();
        assert!(!index.is_failed(Path::new("m.py")));
    }

    #[test]
    fn update_ignores_other_extensions() {
        let (dir, files) = project(&[("m.py", "X = 1\n"), ("notes.txt", "x = 1\n")]);
        let mut index = ProjectIndex::build(dir.path(), &files, &py());

        assert_eq!(index.update(Path::new("notes.txt")).unwrap(), 0);
        assert_eq!(index.file_count(), 1);
        assert!(index.file_entry(Path::new("notes.txt")).is_none());
        assert!(!index.is_failed(Path::new("notes.txt")));
    }

    #[test]
    fn file_summary_groups_names_by_kind() {
        let (dir, files) = project(&[(
            "m.py",
            "import os\n\nLIMIT = 3\n\n\nclass Job:\n    def run(self):\n        pass\n\n\ndef main():\n    pass\n",
        )]);
        let index = ProjectIndex::build(dir.path(), &files, &py());
        let summary = index.file_summary(Path::new("m.py"));

        assert_eq!(summary.definitions_found, 5);
        assert_eq!(summary.functions, vec!["Job.run", "main"]);
        assert_eq!(summary.classes, vec!["Job"]);
        assert_eq!(summary.variables, vec!["LIMIT"]);
        assert_eq!(summary.imports, vec!["os"]);

        assert_eq!(index.file_summary(Path::new("missing.py")).definitions_found, 0);
    }

    #[test]
    fn update_of_deleted_file_removes_entries() {
        let (dir, files) = project(&[("gone.py", "def g():\n    pass\n")]);
        let mut index = ProjectIndex::build(dir.path(), &files, &py());
        fs::remove_file(dir.path().join("gone.py")).unwrap();

        assert_eq!(index.update(Path::new("gone.py")).unwrap(), 0);
        assert_eq!(index.file_count(), 0);
        assert!(index.file_definitions(Path::new("gone.py")).is_empty());
    }

    #[test]
    fn absolute_paths_are_stored_relative() {
        let (dir, _) = project(&[("abs.py", "V = 1\n")]);
        let absolute = dir.path().join("abs.py");
        let index = ProjectIndex::build(dir.path(), &[absolute.clone()], &py());
        assert_eq!(index.file_definitions(&absolute)[0].file, PathBuf::from("abs.py"));
    }

    #[test]
    fn usages_are_queryable_by_name() {
        let (dir, files) = project(&[
            ("lib.py", "def f(a):\n    return a\n"),
            ("use.py", "from lib import f\nf('x')\nf(1)\n"),
        ]);
        let index = ProjectIndex::build(dir.path(), &files, &py());
        let calls: Vec<&Usage> = index.usages_of("f").collect();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|u| u.file == Path::new("use.py")));
    }

    #[test]
    fn build_index_response_lists_definitions_and_failures() {
        let (dir, files) = project(&[("ok.py", "A = 1\n"), ("bad.py", "(\n")]);
        let (_, response) = build_index(dir.path(), &files, &py());
        assert_eq!(response.files_indexed, 1);
        assert_eq!(response.definitions.len(), 1);
        assert_eq!(response.failed_files.len(), 1);
    }
}
