//! Parse validation for proposed edits.
//!
//! After an edit is computed in memory, the new text is re-parsed with
//! tree-sitter. ERROR/MISSING nodes that were not already present in the
//! original are reported as introduced; pre-existing breakage in a file does
//! not count against an edit that leaves it alone.

use crate::pool;
use crate::ts::{ParsedSource, PythonParser, TreeSitterError};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Parse error introduced: found {count} new ERROR nodes")]
    ParseErrorIntroduced {
        count: usize,
        errors: Vec<ErrorLocation>,
    },

    #[error("Tree-sitter error: {0}")]
    TreeSitter(#[from] TreeSitterError),
}

impl ValidationError {
    /// First introduced error line, when the error carries locations.
    pub fn first_line(&self) -> Option<usize> {
        match self {
            ValidationError::ParseErrorIntroduced { errors, .. } => {
                errors.first().map(|e| e.line)
            }
            ValidationError::TreeSitter(_) => None,
        }
    }
}

/// Location of an error node in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorLocation {
    pub byte_start: usize,
    pub byte_end: usize,
    pub line: usize,
    pub column: usize,
    /// Trimmed text of the line holding the error.
    pub context: String,
}

/// Parse validator owning its own parser.
pub struct ParseValidator {
    parser: PythonParser,
}

impl ParseValidator {
    pub fn new() -> Result<Self, TreeSitterError> {
        Ok(Self {
            parser: PythonParser::new()?,
        })
    }

    /// Validate that source has no parse errors.
    pub fn validate(&mut self, source: &str) -> Result<(), ValidationError> {
        let parsed = self.parser.parse_with_source(source)?;
        check_clean(&parsed)
    }

    /// Check that `edited` introduces no errors absent from `original`.
    pub fn validate_edit(&mut self, original: &str, edited: &str) -> Result<(), ValidationError> {
        let original_parsed = self.parser.parse_with_source(original)?;
        let edited_parsed = self.parser.parse_with_source(edited)?;
        check_new_errors(&original_parsed, &edited_parsed)
    }
}

/// Validation through the thread-local parser pool.
pub mod pooled {
    use super::*;

    pub fn validate(source: &str) -> Result<(), ValidationError> {
        pool::with_parser(|parser| {
            let parsed = parser.parse_with_source(source)?;
            check_clean(&parsed)
        })?
    }

    pub fn validate_edit(original: &str, edited: &str) -> Result<(), ValidationError> {
        pool::with_parser(|parser| {
            let original_parsed = parser.parse_with_source(original)?;
            let edited_parsed = parser.parse_with_source(edited)?;
            check_new_errors(&original_parsed, &edited_parsed)
        })?
    }
}

fn check_clean(parsed: &ParsedSource<'_>) -> Result<(), ValidationError> {
    let errors = collect_errors(parsed);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::ParseErrorIntroduced {
            count: errors.len(),
            errors,
        })
    }
}

fn check_new_errors(
    original: &ParsedSource<'_>,
    edited: &ParsedSource<'_>,
) -> Result<(), ValidationError> {
    if !edited.has_errors() {
        return Ok(());
    }

    // Byte offsets move with the edit, so errors are matched by line text.
    let mut known: HashMap<String, usize> = HashMap::new();
    for error in collect_errors(original) {
        *known.entry(error.context).or_default() += 1;
    }

    let new_errors: Vec<ErrorLocation> = collect_errors(edited)
        .into_iter()
        .filter(|error| match known.get_mut(&error.context) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .collect();

    if new_errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::ParseErrorIntroduced {
            count: new_errors.len(),
            errors: new_errors,
        })
    }
}

fn collect_errors(parsed: &ParsedSource<'_>) -> Vec<ErrorLocation> {
    let lines: Vec<&str> = parsed.source.lines().collect();
    parsed
        .error_nodes()
        .into_iter()
        .map(|node| ErrorLocation {
            byte_start: node.byte_start,
            byte_end: node.byte_end,
            line: node.start_point.row + 1,
            column: node.start_point.column + 1,
            context: lines
                .get(node.start_point.row)
                .map(|line| line.trim().to_string())
                .unwrap_or_default(),
        })
        .collect()
}
