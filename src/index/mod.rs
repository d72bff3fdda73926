//! Project-wide symbol index and lookup.

pub mod project;
pub mod search;

pub use project::{
    build_index, is_eligible, reindex_file, relative_to_root, update_index, BuildIndexResponse,
    FileReindex, FileSummary, ProjectIndex, DEFAULT_EXTENSIONS,
};
pub use search::{search, suggestions, SearchMatch, SearchOptions, SearchResponse};
