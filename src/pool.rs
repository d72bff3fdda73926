//! Thread-local parser pooling.
//!
//! Indexing a project parses every file; keeping one tree-sitter parser per
//! thread avoids re-initialising the Python grammar for each of them.

use crate::ts::{PythonParser, TreeSitterError};
use std::cell::RefCell;

thread_local! {
    static PYTHON_PARSER: RefCell<Option<PythonParser>> = const { RefCell::new(None) };
}

/// Execute function with pooled parser instance.
///
/// On first call per thread, creates new parser. Subsequent calls reuse
/// the same parser instance.
///
/// # Example
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use safe_edit::pool::with_parser;
///
/// let has_errors = with_parser(|parser| {
///     parser.parse_with_source("def main():\n    pass\n").map(|p| p.has_errors())
/// })??;
/// # Ok(())
/// # }
/// ```
pub fn with_parser<F, R>(f: F) -> Result<R, TreeSitterError>
where
    F: FnOnce(&mut PythonParser) -> R,
{
    PYTHON_PARSER.with(|cell| {
        let mut opt = cell.borrow_mut();
        if opt.is_none() {
            *opt = Some(PythonParser::new()?);
        }
        match opt.as_mut() {
            Some(parser) => Ok(f(parser)),
            None => Err(TreeSitterError::LanguageSet),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_is_reused_across_calls() {
        let first = with_parser(|p| p.parse("a = 1\n").map(|t| t.root_node().kind().to_string()))
            .unwrap()
            .unwrap();
        let second = with_parser(|p| p.parse("b = 2\n").map(|t| t.root_node().kind().to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(first, "module");
        assert_eq!(second, "module");
    }
}
