//! The long-lived engine handle.
//!
//! An [`Engine`] owns the project index, the library index and the impact
//! policy. Every patch request walks the same stages:
//!
//! ```text
//! Validating -> Analyzing -> (Blocked | Applying) -> Reindexing -> Done
//! ```
//!
//! Validation failures and `Blocked` are terminal and leave the file and the
//! index untouched. Patch requests (and index rebuilds) serialize on one
//! writer gate; searches only take the index read lock.

use crate::config::EngineConfig;
use crate::definition::{Definition, TypeFilter};
use crate::diff::{DiffBlock, DiffError};
use crate::edit::{self, EditError};
use crate::impact::{self, ImpactPolicy, ImpactWarning, Severity};
use crate::index::{
    is_eligible, relative_to_root, reindex_file, search, BuildIndexResponse, FileReindex,
    FileSummary, ProjectIndex, SearchOptions, SearchResponse,
};
use crate::library::{
    LibraryError, LibraryIndex, LibraryIntrospector, LibrarySummary, SourceTreeIntrospector,
};
use crate::safety::{SafetyError, WorkspaceGuard};
use crate::ts::{self, ParseError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Stage of a patch request, logged as the request advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStage {
    Validating,
    Analyzing,
    Blocked,
    Applying,
    Reindexing,
    Done,
}

impl fmt::Display for PatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PatchStage::Validating => "validating",
            PatchStage::Analyzing => "analyzing",
            PatchStage::Blocked => "blocked",
            PatchStage::Applying => "applying",
            PatchStage::Reindexing => "reindexing",
            PatchStage::Done => "done",
        })
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error("edit blocked by impact analysis ({} blocking warning(s))", .warnings.len())]
    Blocked { warnings: Vec<ImpactWarning> },

    #[error("project index not built; run setup first")]
    IndexNotBuilt,

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

impl EngineError {
    /// Taxonomy name reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Parse(_) => "ParseError",
            EngineError::Diff(DiffError::ContentMismatch { .. }) => "ContentMismatch",
            EngineError::Diff(DiffError::Overlap { .. }) => "OverlapError",
            EngineError::Diff(DiffError::InvalidBlock { .. }) => "InvalidBlock",
            EngineError::Diff(DiffError::LineOutOfRange { .. }) => "LineOutOfRange",
            EngineError::Blocked { .. } => "BlockedByAnalysis",
            EngineError::IndexNotBuilt => "IndexNotBuilt",
            EngineError::Edit(EditError::ContentChanged { .. }) => "ContentChanged",
            EngineError::Edit(_) => "Io",
            EngineError::Safety(_) => "Safety",
            EngineError::Library(LibraryError::NotIndexed { .. }) => "LibraryNotIndexed",
            EngineError::Library(_) => "LibraryError",
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        let mut info = ErrorInfo {
            kind: self.kind().to_string(),
            message: self.to_string(),
            expected: None,
            actual: None,
            line: None,
        };
        match self {
            EngineError::Diff(DiffError::ContentMismatch {
                start_line,
                expected,
                actual,
                ..
            }) => {
                info.expected = Some(expected.clone());
                info.actual = Some(actual.clone());
                info.line = Some(*start_line);
            }
            EngineError::Diff(DiffError::LineOutOfRange { start_line, .. }) => {
                info.line = Some(*start_line);
            }
            EngineError::Parse(err) => info.line = err.line,
            _ => {}
        }
        info
    }
}

/// Serializable error object carried by responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

/// Response of `apply_edits` and `preview_edits`.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyEditsResponse {
    pub success: bool,
    pub file: PathBuf,
    pub applied_count: usize,
    /// False when every block was a no-op.
    pub changed: bool,
    pub warnings: Vec<ImpactWarning>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// The write succeeded but the new content failed to index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reindex_error: Option<ErrorInfo>,
    /// Proposed content, only for previews.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    pub suggested_next_action: String,
}

struct Project {
    guard: WorkspaceGuard,
    index: ProjectIndex,
}

struct PatchSuccess {
    file: PathBuf,
    content: String,
    changed: bool,
    warnings: Vec<ImpactWarning>,
    recommendations: Vec<String>,
    reindex_error: Option<ParseError>,
}

pub struct Engine {
    config: EngineConfig,
    policy: ImpactPolicy,
    project: RwLock<Option<Project>>,
    writer: Mutex<()>,
    libraries: LibraryIndex,
    introspector: Box<dyn LibraryIntrospector>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let policy = config.analysis.policy();
        let introspector = Box::new(SourceTreeIntrospector::new(
            config.library.search_paths.clone(),
        ));
        Self {
            config,
            policy,
            project: RwLock::new(None),
            writer: Mutex::new(()),
            libraries: LibraryIndex::new(),
            introspector,
        }
    }

    /// Replace the library introspector.
    pub fn with_introspector(mut self, introspector: Box<dyn LibraryIntrospector>) -> Self {
        self.introspector = introspector;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &ImpactPolicy {
        &self.policy
    }

    pub fn is_setup(&self) -> bool {
        self.project.read().is_some()
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.project
            .read()
            .as_ref()
            .map(|p| p.guard.workspace_root().to_path_buf())
    }

    /// Discard any existing index and build a fresh one for `root`.
    pub fn setup(&self, root: &Path, files: &[PathBuf]) -> Result<BuildIndexResponse, EngineError> {
        let _gate = self.writer.lock();
        let guard = WorkspaceGuard::new(root)?;
        let canonical_root = guard.workspace_root().to_path_buf();

        let files: Vec<PathBuf> = files
            .iter()
            .map(|file| {
                let relative = relative_to_root(root, file);
                relative_to_root(&canonical_root, &relative)
            })
            .collect();

        let index = ProjectIndex::build(&canonical_root, &files, &self.config.index.extensions);
        let response = index.to_response();
        *self.project.write() = Some(Project { guard, index });
        Ok(response)
    }

    /// Run `f` against the current index.
    pub fn with_index<R>(&self, f: impl FnOnce(&ProjectIndex) -> R) -> Result<R, EngineError> {
        let project = self.project.read();
        let project = project.as_ref().ok_or(EngineError::IndexNotBuilt)?;
        Ok(f(&project.index))
    }

    pub fn search(
        &self,
        identifier: &str,
        type_filter: TypeFilter,
        context_file: Option<&Path>,
    ) -> Result<SearchResponse, EngineError> {
        self.search_definitions(identifier, type_filter, context_file, false)
    }

    /// [`Engine::search`], optionally attaching every indexed usage of each
    /// match's name.
    pub fn search_definitions(
        &self,
        identifier: &str,
        type_filter: TypeFilter,
        context_file: Option<&Path>,
        include_usage: bool,
    ) -> Result<SearchResponse, EngineError> {
        self.with_index(|index| {
            let options = SearchOptions {
                type_filter,
                context_file: context_file.map(|file| relative_to_root(index.root(), file)),
                max_results: self.config.search.max_results,
            };
            let mut response = search(index.definitions(), identifier, &options);
            if include_usage {
                for found in &mut response.matches {
                    let usages = index.usages_of(&found.definition.name).cloned().collect();
                    found.usages = Some(usages);
                }
            }
            response
        })
    }

    pub fn file_definitions(&self, file: &Path) -> Result<Vec<Definition>, EngineError> {
        self.with_index(|index| index.file_definitions(file).to_vec())
    }

    pub fn file_summary(&self, file: &Path) -> Result<FileSummary, EngineError> {
        self.with_index(|index| index.file_summary(file))
    }

    /// Re-parse one file from disk and swap its entry in the index.
    pub fn update_index(&self, file: &Path) -> Result<usize, EngineError> {
        let _gate = self.writer.lock();
        let (root, relative, eligible) = self.with_index(|index| {
            let relative = relative_to_root(index.root(), file);
            let eligible = is_eligible(&relative, index.extensions());
            (index.root().to_path_buf(), relative, eligible)
        })?;
        if !eligible {
            return Ok(0);
        }
        let outcome = reindex_file(&root, &relative);

        let mut project = self.project.write();
        let project = project.as_mut().ok_or(EngineError::IndexNotBuilt)?;
        Ok(project.index.commit(relative, outcome)?)
    }

    /// Validate, analyze, write and reindex.
    pub fn apply_edits(&self, file: &Path, blocks: &[DiffBlock]) -> ApplyEditsResponse {
        match self.run_patch(file, blocks, true) {
            Ok(success) => self.success_response(success, blocks.len(), false),
            Err(err) => failure_response(file, &err),
        }
    }

    /// Validate and analyze without writing; returns the proposed content.
    pub fn preview_edits(&self, file: &Path, blocks: &[DiffBlock]) -> ApplyEditsResponse {
        match self.run_patch(file, blocks, false) {
            Ok(success) => self.success_response(success, blocks.len(), true),
            Err(err) => failure_response(file, &err),
        }
    }

    fn success_response(
        &self,
        success: PatchSuccess,
        applied_count: usize,
        preview: bool,
    ) -> ApplyEditsResponse {
        let highest = success.warnings.iter().map(|w| w.severity).max();
        let mut suggested = success_action(highest);
        if preview {
            suggested = format!("Preview only; nothing was written. {suggested}");
        }
        ApplyEditsResponse {
            success: true,
            file: success.file,
            applied_count,
            changed: success.changed,
            warnings: success.warnings,
            recommendations: success.recommendations,
            error: None,
            reindex_error: success
                .reindex_error
                .map(|err| EngineError::Parse(err).to_info()),
            new_content: preview.then_some(success.content),
            suggested_next_action: suggested,
        }
    }

    fn run_patch(
        &self,
        file: &Path,
        blocks: &[DiffBlock],
        write: bool,
    ) -> Result<PatchSuccess, EngineError> {
        let _gate = self.writer.lock();
        let log_stage = |stage: PatchStage| {
            tracing::debug!(file = %file.display(), %stage, "patch stage");
        };

        // Validating
        log_stage(PatchStage::Validating);
        if blocks.is_empty() {
            return Err(DiffError::InvalidBlock {
                index: 0,
                reason: "at least one block is required".to_string(),
            }
            .into());
        }
        let guard = self.guard_for(file)?;
        let canonical = guard.validate_path(file)?;
        let relative = guard.relative(&canonical);
        let original = edit::read_text(&canonical)?;
        let fingerprint = edit::fingerprint(original.as_bytes());
        let patch = edit::apply_blocks(&original, blocks)?;

        // Analyzing
        log_stage(PatchStage::Analyzing);
        let indexed = self.is_indexed(&relative);
        let report = {
            let project = self.project.read();
            project.as_ref().filter(|_| indexed).map(|project| {
                impact::analyze(&relative, &original, &patch, &project.index, &self.policy)
            })
        };
        let (warnings, recommendations) = match report {
            Some(report) if !report.should_proceed => {
                log_stage(PatchStage::Blocked);
                let blocking: Vec<ImpactWarning> =
                    report.blocking(&self.policy).cloned().collect();
                tracing::warn!(
                    file = %relative.display(),
                    blocking = blocking.len(),
                    "edit blocked by impact analysis"
                );
                return Err(EngineError::Blocked { warnings: blocking });
            }
            Some(report) => (report.warnings, report.recommendations),
            None => {
                tracing::debug!(file = %relative.display(), "not an indexed file; skipping impact analysis");
                (Vec::new(), Vec::new())
            }
        };

        let changed = patch.changed(&original);
        if !write {
            return Ok(PatchSuccess {
                file: relative,
                content: patch.content,
                changed,
                warnings,
                recommendations,
                reindex_error: None,
            });
        }

        // Applying
        log_stage(PatchStage::Applying);
        if changed {
            let target = guard.revalidate(&canonical)?;
            edit::write_if_unchanged(&target, fingerprint, &patch.content)?;
        }

        // Reindexing
        let mut reindex_error = None;
        if changed && indexed {
            log_stage(PatchStage::Reindexing);
            let outcome = match ts::index_source(&relative, &patch.content) {
                Ok(symbols) => FileReindex::Parsed(symbols),
                Err(err) => FileReindex::Failed(err),
            };
            if let Some(project) = self.project.write().as_mut() {
                if let Err(err) = project.index.commit(relative.clone(), outcome) {
                    reindex_error = Some(err);
                }
            }
        }

        log_stage(PatchStage::Done);
        tracing::info!(
            file = %relative.display(),
            blocks = blocks.len(),
            warnings = warnings.len(),
            changed,
            "applied edits"
        );

        Ok(PatchSuccess {
            file: relative,
            content: patch.content,
            changed,
            warnings,
            recommendations,
            reindex_error,
        })
    }

    /// Whether `relative` belongs in the project index: a project is set up
    /// and the file has an indexed extension.
    fn is_indexed(&self, relative: &Path) -> bool {
        self.project
            .read()
            .as_ref()
            .is_some_and(|project| is_eligible(relative, project.index.extensions()))
    }

    fn guard_for(&self, file: &Path) -> Result<WorkspaceGuard, EngineError> {
        if let Some(project) = self.project.read().as_ref() {
            return Ok(project.guard.clone());
        }
        // Without a project the file's own directory bounds the edit.
        let absolute = if file.is_absolute() {
            file.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(EditError::Io)?
                .join(file)
        };
        let parent = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(WorkspaceGuard::new(parent)?)
    }

    pub fn index_library(
        &self,
        name: &str,
        include_private: bool,
    ) -> Result<LibrarySummary, EngineError> {
        Ok(self
            .libraries
            .index_library(name, include_private, self.introspector.as_ref())?)
    }

    pub fn search_library(
        &self,
        name: &str,
        query: &str,
        type_filter: TypeFilter,
    ) -> Result<SearchResponse, EngineError> {
        Ok(self
            .libraries
            .search(name, query, type_filter, self.config.search.max_results)?)
    }

    pub fn indexed_libraries(&self) -> Vec<LibrarySummary> {
        self.libraries.summaries()
    }

    pub fn library_summary(&self, name: &str) -> Option<LibrarySummary> {
        self.libraries.summary(name)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn failure_response(file: &Path, err: &EngineError) -> ApplyEditsResponse {
    tracing::warn!(file = %file.display(), kind = err.kind(), error = %err, "patch request failed");
    let warnings = match err {
        EngineError::Blocked { warnings } => warnings.clone(),
        _ => Vec::new(),
    };
    ApplyEditsResponse {
        success: false,
        file: file.to_path_buf(),
        applied_count: 0,
        changed: false,
        warnings,
        recommendations: Vec::new(),
        error: Some(err.to_info()),
        reindex_error: None,
        new_content: None,
        suggested_next_action: failure_action(err).to_string(),
    }
}

fn success_action(highest: Option<Severity>) -> String {
    match highest {
        Some(Severity::High) => {
            "HIGH PRIORITY: breaking changes detected; test the affected code immediately."
        }
        Some(Severity::Medium) => {
            "RECOMMENDED: look up the affected definitions and check their callers still work."
        }
        Some(Severity::Low) => "Changes applied. Impact analysis shows low risk.",
        None => "Changes applied. No impact issues detected.",
    }
    .to_string()
}

fn failure_action(err: &EngineError) -> &'static str {
    match err {
        EngineError::Diff(DiffError::ContentMismatch { .. }) => {
            "Re-read the file around the anchored lines and resend the block with the current content."
        }
        EngineError::Diff(DiffError::Overlap { .. }) => {
            "Merge the overlapping blocks into one block or anchor them to disjoint line ranges."
        }
        EngineError::Diff(DiffError::InvalidBlock { .. }) => {
            "Fix the block: start_line must be >= 1 and end_line must not precede it."
        }
        EngineError::Diff(DiffError::LineOutOfRange { .. }) => {
            "Re-read the file; the anchored lines are past its end."
        }
        EngineError::Blocked { .. } => {
            "Review the blocking warnings and adjust the edit, or inspect the affected definitions first."
        }
        EngineError::Edit(EditError::ContentChanged { .. }) => {
            "The file changed while the edit was prepared; re-read it and retry."
        }
        EngineError::IndexNotBuilt => "Run setup to build the project index first.",
        EngineError::Safety(_) => "Only files inside the project root can be edited.",
        EngineError::Parse(_) => "Fix the syntax error reported for the file.",
        EngineError::Edit(_) => "Check that the file exists and is readable UTF-8 text.",
        EngineError::Library(_) => "Index the library before searching it.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup(files: &[(&str, &str)]) -> (TempDir, Engine) {
        let dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
            paths.push(PathBuf::from(name));
        }
        let engine = Engine::default();
        engine.setup(dir.path(), &paths).unwrap();
        (dir, engine)
    }

    #[test]
    fn search_before_setup_is_index_not_built() {
        let engine = Engine::default();
        let err = engine.search("f", TypeFilter::Any, None).unwrap_err();
        assert_eq!(err.kind(), "IndexNotBuilt");
        assert!(engine.file_definitions(Path::new("a.py")).is_err());
    }

    #[test]
    fn apply_reindexes_file() {
        let (dir, engine) = setup(&[("m.py", "def old():\n    pass\n")]);
        let response = engine.apply_edits(
            &dir.path().join("m.py"),
            &[DiffBlock::new(1, None, "def old():", "def new():")],
        );
        assert!(response.success, "{response:?}");
        assert_eq!(response.applied_count, 1);
        assert_eq!(response.file, PathBuf::from("m.py"));

        assert!(!engine.search("old", TypeFilter::Any, None).unwrap().found);
        assert!(engine.search("new", TypeFilter::Any, None).unwrap().found);
    }

    #[test]
    fn mismatch_leaves_file_untouched() {
        let (dir, engine) = setup(&[("m.py", "x = 1\n")]);
        let response = engine.apply_edits(
            Path::new("m.py"),
            &[DiffBlock::new(1, None, "x = 2", "x = 3")],
        );
        assert!(!response.success);
        let error = response.error.unwrap();
        assert_eq!(error.kind, "ContentMismatch");
        assert_eq!(error.expected.as_deref(), Some("x = 2"));
        assert_eq!(error.actual.as_deref(), Some("x = 1"));
        assert_eq!(fs::read_to_string(dir.path().join("m.py")).unwrap(), "x = 1\n");
    }

    #[test]
    fn preview_does_not_write() {
        let (dir, engine) = setup(&[("m.py", "x = 1\n")]);
        let response = engine.preview_edits(
            Path::new("m.py"),
            &[DiffBlock::new(1, None, "x = 1", "x = 2")],
        );
        assert!(response.success);
        assert_eq!(response.new_content.as_deref(), Some("x = 2\n"));
        assert_eq!(fs::read_to_string(dir.path().join("m.py")).unwrap(), "x = 1\n");
    }

    #[test]
    fn empty_block_list_is_invalid() {
        let (_dir, engine) = setup(&[("m.py", "x = 1\n")]);
        let response = engine.apply_edits(Path::new("m.py"), &[]);
        assert_eq!(response.error.unwrap().kind, "InvalidBlock");
    }

    #[test]
    fn search_can_include_usages() {
        let (_dir, engine) = setup(&[
            ("lib.py", "def f(a):\n    return a\n"),
            ("app.py", "from lib import f\n\nf(1)\nf(2, 3)\n"),
        ]);

        let plain = engine.search("f", TypeFilter::Function, None).unwrap();
        assert!(plain.matches[0].usages.is_none());

        let found = engine
            .search_definitions("f", TypeFilter::Function, None, true)
            .unwrap();
        let usages = found.matches[0].usages.as_ref().unwrap();
        assert_eq!(usages.len(), 2);
        assert!(usages.iter().all(|u| u.file == PathBuf::from("app.py")));
        assert_eq!(usages[0].line, 3);
        assert_eq!(usages[1].arg_count, Some(2));
    }

    #[test]
    fn non_python_files_skip_analysis_and_index() {
        let (dir, _) = setup(&[("m.py", "x = 1\n")]);
        fs::write(dir.path().join("notes.txt"), "hello world\n").unwrap();
        let config: EngineConfig = crate::config::load_from_str("[analysis]\nblock_at = \"high\"\n").unwrap();
        let engine = Engine::new(config);
        engine
            .setup(dir.path(), &[PathBuf::from("m.py"), PathBuf::from("notes.txt")])
            .unwrap();

        let response = engine.apply_edits(
            Path::new("notes.txt"),
            &[DiffBlock::new(1, None, "hello world", "hello there world")],
        );
        assert!(response.success, "{response:?}");
        assert!(response.warnings.is_empty());
        assert!(response.reindex_error.is_none());
        assert_eq!(
            fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "hello there world\n"
        );
        engine
            .with_index(|index| {
                assert_eq!(index.file_count(), 1);
                assert!(!index.is_failed(Path::new("notes.txt")));
            })
            .unwrap();
        assert_eq!(engine.update_index(Path::new("notes.txt")).unwrap(), 0);
    }

    #[test]
    fn stage_names() {
        assert_eq!(PatchStage::Reindexing.to_string(), "reindexing");
        assert_eq!(PatchStage::Blocked.to_string(), "blocked");
    }
}
