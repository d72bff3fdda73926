//! Tree-sitter integration for Python source.
//!
//! Parsing, syntax-error detection, and extraction of definitions and usages.
//! Everything downstream (index, impact analysis, validation) goes through
//! here rather than touching the grammar directly.

pub mod errors;
pub mod indexer;
pub mod parser;
pub mod usages;

pub use errors::{ParseError, TreeSitterError};
pub use indexer::{index_file, index_source};
pub use parser::{ErrorNode, ParsedSource, PythonParser};
pub use usages::collect_usages;
