//! safe-edit: symbol index and line-anchored patch engine for Python projects
//!
//! Two coupled subsystems back an agent-facing editing API:
//!
//! - a **symbol index** that parses Python files with tree-sitter into
//!   definitions (functions, classes, variables, imports) and usages, kept per
//!   file and updated incrementally;
//! - a **patch engine** that applies [`DiffBlock`]s anchored to line ranges,
//!   verifying the anchored text, shifting later blocks as earlier ones grow or
//!   shrink, and consulting the index for the impact of the change.
//!
//! # Safety
//!
//! - Every block's search text is checked against the file before anything
//!   is written; blocks are never relocated to a nearby match
//! - All blocks for a file apply or none do
//! - Atomic file writes (tempfile + fsync + rename) with a drift check
//! - Workspace boundary enforcement
//!
//! # Example
//!
//! ```no_run
//! use safe_edit::{DiffBlock, Engine, TypeFilter};
//! use std::path::{Path, PathBuf};
//!
//! let engine = Engine::default();
//! engine.setup(Path::new("."), &[PathBuf::from("app.py")])?;
//!
//! let response = engine.apply_edits(
//!     Path::new("app.py"),
//!     &[DiffBlock::new(1, None, "def f(a):", "def f(a, b):")],
//! );
//! for warning in &response.warnings {
//!     println!("{}: {}", warning.severity, warning.message);
//! }
//!
//! let found = engine.search("f", TypeFilter::Function, None)?;
//! println!("{} match(es)", found.total_matches);
//! # Ok::<(), safe_edit::EngineError>(())
//! ```

pub mod config;
pub mod definition;
pub mod diff;
pub mod discover;
pub mod edit;
pub mod engine;
pub mod impact;
pub mod index;
pub mod library;
pub mod pool;
pub mod safety;
pub mod ts;
pub mod validate;

// Re-exports
pub use config::{load_for_root, load_from_path, load_from_str, ConfigError, EngineConfig};
pub use definition::{
    Definition, DefinitionDetail, DefinitionKind, FileSymbols, TypeFilter, Usage, UsageKind,
};
pub use diff::{DiffBlock, DiffError};
pub use discover::discover_files;
pub use edit::{apply_blocks, EditError, PatchOutput};
pub use engine::{ApplyEditsResponse, Engine, EngineError, ErrorInfo, PatchStage};
pub use impact::{ImpactPolicy, ImpactReport, ImpactWarning, Severity};
pub use index::{BuildIndexResponse, ProjectIndex, SearchResponse};
pub use library::{LibraryError, LibraryIndex, LibraryIntrospector, SourceTreeIntrospector};
pub use safety::{SafetyError, WorkspaceGuard};
pub use ts::{ParseError, PythonParser, TreeSitterError};
pub use validate::{ParseValidator, ValidationError};
