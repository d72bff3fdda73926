//! Project file discovery for local use.
//!
//! Walks a root, prunes excluded directories by name, keeps files with an
//! indexed extension, and returns root-relative paths in sorted order.

use crate::config::IndexSettings;
use crate::index::is_eligible;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn discover_files(root: &Path, settings: &IndexSettings) -> Result<Vec<PathBuf>, walkdir::Error> {
    let excluded = |name: &str| settings.exclude_dirs.iter().any(|dir| dir == name);

    let mut files = Vec::new();
    let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !entry.file_type().is_dir()
            || !entry.file_name().to_str().is_some_and(excluded)
    });

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if is_eligible(relative, &settings.extensions) {
            files.push(relative.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}
