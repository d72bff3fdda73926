//! Line-anchored diff blocks and their validation.
//!
//! A block names a 1-indexed line range and the text the caller believes is
//! there. Validation compares that text to the file line by line after
//! trimming surrounding whitespace; anything else (a different token, a
//! missing or extra line) is a [`DiffError::ContentMismatch`]. Blocks are never
//! relocated to a nearby match.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured edit anchored to `[start_line, end_line]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffBlock {
    pub start_line: usize,
    /// Inclusive; `None` anchors the single line `start_line`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
    pub search_content: String,
    #[serde(default)]
    pub replace_content: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    #[error("content at lines {start_line}-{end_line} does not match search_content")]
    ContentMismatch {
        start_line: usize,
        end_line: usize,
        expected: String,
        actual: String,
    },

    #[error("invalid block #{index}: {reason}")]
    InvalidBlock { index: usize, reason: String },

    #[error("lines {start_line}-{end_line} are outside the file ({line_count} lines)")]
    LineOutOfRange {
        start_line: usize,
        end_line: usize,
        line_count: usize,
    },

    #[error("blocks overlap: lines {first_start}-{first_end} and {second_start}-{second_end}")]
    Overlap {
        first_start: usize,
        first_end: usize,
        second_start: usize,
        second_end: usize,
    },
}

impl DiffBlock {
    pub fn new(
        start_line: usize,
        end_line: Option<usize>,
        search_content: impl Into<String>,
        replace_content: impl Into<String>,
    ) -> Self {
        Self {
            start_line,
            end_line,
            search_content: search_content.into(),
            replace_content: replace_content.into(),
        }
    }

    /// Last anchored line (inclusive).
    pub fn end(&self) -> usize {
        self.end_line.unwrap_or(self.start_line)
    }

    /// Number of anchored lines in the original file.
    pub fn anchored_len(&self) -> usize {
        self.end().saturating_sub(self.start_line) + 1
    }

    pub fn search_lines(&self) -> Vec<&str> {
        split_lines(&self.search_content)
    }

    /// Replacement lines; an empty replacement deletes the anchored range.
    pub fn replace_lines(&self) -> Vec<&str> {
        if self.replace_content.is_empty() {
            Vec::new()
        } else {
            split_lines(&self.replace_content)
        }
    }

    /// Check the block's shape without looking at file content.
    pub fn check_shape(&self, index: usize) -> Result<(), DiffError> {
        if self.start_line == 0 {
            return Err(DiffError::InvalidBlock {
                index,
                reason: "start_line must be at least 1".to_string(),
            });
        }
        if let Some(end) = self.end_line {
            if end < self.start_line {
                return Err(DiffError::InvalidBlock {
                    index,
                    reason: format!("end_line {end} is before start_line {}", self.start_line),
                });
            }
        }
        Ok(())
    }

    /// Whether two blocks' anchored ranges share a line.
    pub fn overlaps(&self, other: &DiffBlock) -> bool {
        self.start_line <= other.end() && other.start_line <= self.end()
    }
}

/// Split text into lines (`\n` or `\r\n`); empty text is one empty line.
pub fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        vec![""]
    } else {
        text.lines().collect()
    }
}

/// Per-line comparison ignoring surrounding whitespace.
pub fn lines_match(actual: &[&str], expected: &[&str]) -> bool {
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected)
            .all(|(a, e)| a.trim() == e.trim())
}

/// Validate one block against the file's current lines.
pub fn validate_block(lines: &[&str], block: &DiffBlock, index: usize) -> Result<(), DiffError> {
    block.check_shape(index)?;

    let end = block.end();
    // An empty file has one implicit blank line to anchor inserts against.
    if lines.is_empty() && end == 1 && block.search_content.trim().is_empty() {
        return Ok(());
    }
    if end > lines.len() {
        return Err(DiffError::LineOutOfRange {
            start_line: block.start_line,
            end_line: end,
            line_count: lines.len(),
        });
    }

    let actual = &lines[block.start_line - 1..end];
    let expected = block.search_lines();
    if !lines_match(actual, &expected) {
        return Err(DiffError::ContentMismatch {
            start_line: block.start_line,
            end_line: end,
            expected: block.search_content.clone(),
            actual: actual.join("\n"),
        });
    }
    Ok(())
}

/// Validate every block against the same original content.
///
/// Stops at the first failing block.
pub fn validate_blocks(content: &str, blocks: &[DiffBlock]) -> Result<(), DiffError> {
    let lines: Vec<&str> = content.lines().collect();
    for (index, block) in blocks.iter().enumerate() {
        validate_block(&lines, block, index)?;
    }
    Ok(())
}
