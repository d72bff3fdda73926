use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeSitterError {
    #[error("failed to set language for parser")]
    LanguageSet,

    #[error("failed to parse source code")]
    ParseFailed,

    #[error("syntax error detected at line {line} (byte {byte_start}..{byte_end})")]
    SyntaxError {
        line: usize,
        byte_start: usize,
        byte_end: usize,
    },
}

/// A file the indexer could not turn into definitions.
///
/// Recorded per file; never fatal to a whole index build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseError {
    pub file: PathBuf,
    /// 1-indexed line of the first syntax error, when one is known.
    pub line: Option<usize>,
    pub reason: String,
}

impl ParseError {
    pub fn new(file: impl Into<PathBuf>, line: Option<usize>, reason: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(
                f,
                "failed to parse {}:{}: {}",
                self.file.display(),
                line,
                self.reason
            ),
            None => write!(f, "failed to parse {}: {}", self.file.display(), self.reason),
        }
    }
}

impl std::error::Error for ParseError {}
