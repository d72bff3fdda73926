use crate::diff::{validate_blocks, DiffBlock, DiffError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Line terminator detected from a file's first line break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn detect(content: &str) -> Self {
        match content.find('\n') {
            Some(pos) if content[..pos].ends_with('\r') => LineEnding::CrLf,
            _ => LineEnding::Lf,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// Where a block landed in the rewritten file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedRange {
    /// Anchored range in the original content (1-indexed, inclusive).
    pub original_start: usize,
    pub original_end: usize,
    /// First line of the replacement in the new content.
    pub new_start: usize,
    /// Number of replacement lines (0 for a deletion).
    pub new_len: usize,
}

impl AppliedRange {
    /// Inclusive range in the new content; a deletion covers the line at the cut.
    pub fn new_span(&self) -> (usize, usize) {
        (self.new_start, self.new_start + self.new_len.saturating_sub(1))
    }
}

/// Full new text plus where each block ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "PatchOutput holds the new content; nothing is written yet"]
pub struct PatchOutput {
    pub content: String,
    /// In ascending `original_start` order.
    pub ranges: Vec<AppliedRange>,
}

impl PatchOutput {
    pub fn changed(&self, original: &str) -> bool {
        self.content != original
    }
}

/// A line split off the original text together with its own terminator.
#[derive(Debug, Clone, Copy)]
struct TerminatedLine<'a> {
    text: &'a str,
    /// `"\n"`, `"\r\n"`, or empty for a last line without one.
    ending: &'a str,
}

fn split_terminated(content: &str) -> Vec<TerminatedLine<'_>> {
    content
        .split_inclusive('\n')
        .map(|segment| {
            let text = segment
                .strip_suffix('\n')
                .map(|body| body.strip_suffix('\r').unwrap_or(body))
                .unwrap_or(segment);
            TerminatedLine {
                text,
                ending: &segment[text.len()..],
            }
        })
        .collect()
}

/// Apply `blocks` to `content` in memory, all or nothing.
///
/// Blocks are validated against the original text, sorted by `start_line`,
/// checked for overlap, then spliced in order. Each replacement shifts the
/// blocks after it by `replace_len - anchored_len` lines.
///
/// Lines outside the anchored ranges keep their own terminators. Replacement
/// lines take the terminator of the anchored range (its last line's for the
/// last replacement line), falling back to the file's dominant ending.
pub fn apply_blocks(content: &str, blocks: &[DiffBlock]) -> Result<PatchOutput, DiffError> {
    validate_blocks(content, blocks)?;

    let mut order: Vec<&DiffBlock> = blocks.iter().collect();
    order.sort_by_key(|block| block.start_line);

    for pair in order.windows(2) {
        let (first, second) = (pair[0], pair[1]);
        if first.overlaps(second) {
            return Err(DiffError::Overlap {
                first_start: first.start_line,
                first_end: first.end(),
                second_start: second.start_line,
                second_end: second.end(),
            });
        }
    }

    let default_ending = LineEnding::detect(content).as_str();
    let mut output = split_terminated(content);
    let mut ranges = Vec::with_capacity(order.len());
    let mut offset: isize = 0;

    for block in order {
        let replacement = block.replace_lines();
        let start = (block.start_line as isize - 1 + offset) as usize;
        // Clamped for the empty file, whose implicit line has no segment.
        let end = (start + block.anchored_len()).min(output.len());

        let (inner_ending, last_ending) = if end > start {
            let first = output[start].ending;
            let inner = if first.is_empty() { default_ending } else { first };
            (inner, output[end - 1].ending)
        } else {
            (default_ending, default_ending)
        };

        let new_lines: Vec<TerminatedLine<'_>> = replacement
            .iter()
            .enumerate()
            .map(|(i, &text)| TerminatedLine {
                text,
                ending: if i + 1 == replacement.len() {
                    last_ending
                } else {
                    inner_ending
                },
            })
            .collect();
        output.splice(start..end, new_lines);

        // Deleting through an unterminated last line leaves the new last line unterminated.
        if replacement.is_empty() && last_ending.is_empty() && start > 0 && start == output.len() {
            output[start - 1].ending = "";
        }

        ranges.push(AppliedRange {
            original_start: block.start_line,
            original_end: block.end(),
            new_start: start + 1,
            new_len: replacement.len(),
        });
        offset += replacement.len() as isize - (end - start) as isize;
    }

    let new_content: String = output
        .iter()
        .flat_map(|line| [line.text, line.ending])
        .collect();

    Ok(PatchOutput {
        content: new_content,
        ranges,
    })
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("{file} changed on disk since it was validated")]
    ContentChanged { file: PathBuf },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{file} is not valid UTF-8")]
    Utf8 { file: PathBuf },
}

/// Fingerprint used to detect drift between validation and write.
pub fn fingerprint(content: &[u8]) -> u64 {
    xxh3_64(content)
}

/// Read a file as UTF-8 text.
pub fn read_text(path: &Path) -> Result<String, EditError> {
    let bytes = fs::read(path)?;
    String::from_utf8(bytes).map_err(|_| EditError::Utf8 {
        file: path.to_path_buf(),
    })
}

/// Write `content` to `path` only if the file still hashes to `expected`.
///
/// The re-read and the rename are not atomic with respect to each other; the
/// check narrows the window in which a concurrent writer goes unnoticed.
pub fn write_if_unchanged(path: &Path, expected: u64, content: &str) -> Result<(), EditError> {
    let current = fs::read(path)?;
    if fingerprint(&current) != expected {
        return Err(EditError::ContentChanged {
            file: path.to_path_buf(),
        });
    }

    atomic_write(path, content.as_bytes())?;

    // Bump mtime so watchers and tooling see the change even on coarse clocks.
    let now = filetime::FileTime::now();
    filetime::set_file_mtime(path, now)?;
    Ok(())
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or nothing changes.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), EditError> {
    // Tempfile in the same directory keeps the rename on one filesystem.
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        None => {
            return Err(EditError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Path has no parent directory",
            )))
        }
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    // Keep the original permissions.
    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(temp.path(), metadata.permissions())?;
    }

    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
