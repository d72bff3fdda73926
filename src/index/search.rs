//! Ranked definition lookup.
//!
//! Matching is tiered: exact name, then case-insensitive exact, prefix and
//! substring. Within a tier a definition in the caller's context file and a
//! function/class over a variable get a small bonus. Ties break by file path
//! then line so results are stable across runs.

use crate::definition::{Definition, DefinitionKind, TypeFilter, Usage};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const DEFAULT_MAX_RESULTS: usize = 10;
const MAX_SUGGESTIONS: usize = 5;
const SUGGESTION_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub type_filter: TypeFilter,
    pub context_file: Option<PathBuf>,
    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            type_filter: TypeFilter::Any,
            context_file: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    #[serde(flatten)]
    pub definition: Definition,
    pub relevance_score: f64,
    /// Indexed calls/references to the name, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usages: Option<Vec<Usage>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub identifier: String,
    pub found: bool,
    pub matches: Vec<SearchMatch>,
    /// Match count before truncation to `max_results`.
    pub total_matches: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

fn tier_score(identifier: &str, lowered: &str, name: &str) -> Option<f64> {
    if name == identifier {
        return Some(1.0);
    }
    let name = name.to_lowercase();
    if name == lowered {
        Some(0.9)
    } else if name.starts_with(lowered) {
        Some(0.7)
    } else if name.contains(lowered) {
        Some(0.5)
    } else {
        None
    }
}

fn kind_bonus(kind: DefinitionKind) -> f64 {
    match kind {
        DefinitionKind::Function | DefinitionKind::Class => 0.02,
        DefinitionKind::Variable => 0.01,
        DefinitionKind::Import => 0.0,
    }
}

fn in_context(definition: &Definition, context_file: Option<&Path>) -> bool {
    context_file.is_some_and(|file| definition.is_in(file))
}

/// Search `definitions` for `identifier`.
pub fn search<'a, I>(definitions: I, identifier: &str, options: &SearchOptions) -> SearchResponse
where
    I: IntoIterator<Item = &'a Definition>,
{
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return SearchResponse {
            identifier: String::new(),
            found: false,
            matches: Vec::new(),
            total_matches: 0,
            suggestions: Vec::new(),
        };
    }

    let lowered = identifier.to_lowercase();
    let context_file = options.context_file.as_deref();
    let candidates: Vec<&Definition> = definitions
        .into_iter()
        .filter(|d| options.type_filter.accepts(d.kind()))
        .collect();

    let mut matches: Vec<SearchMatch> = candidates
        .iter()
        .filter_map(|definition| {
            let base = tier_score(identifier, &lowered, &definition.name)?;
            let mut score = base + kind_bonus(definition.kind());
            if in_context(definition, context_file) {
                score += 0.05;
            }
            Some(SearchMatch {
                definition: (*definition).clone(),
                relevance_score: (score * 1000.0).round() / 1000.0,
                usages: None,
            })
        })
        .collect();

    matches.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.definition.file.cmp(&b.definition.file))
            .then_with(|| a.definition.line_start.cmp(&b.definition.line_start))
    });

    let total_matches = matches.len();
    matches.truncate(options.max_results.max(1));

    let suggestions = if matches.is_empty() {
        suggestions(candidates.iter().map(|d| d.name.as_str()), identifier)
    } else {
        Vec::new()
    };

    tracing::debug!(identifier, total_matches, "definition search");

    SearchResponse {
        identifier: identifier.to_string(),
        found: !matches.is_empty(),
        matches,
        total_matches,
        suggestions,
    }
}

/// Names close to `identifier` by Jaro-Winkler similarity, best first.
pub fn suggestions<'a, I>(names: I, identifier: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let lowered = identifier.to_lowercase();
    let mut seen = HashSet::new();
    let mut scored: Vec<(f64, &str)> = names
        .into_iter()
        .filter(|name| seen.insert(*name))
        .map(|name| (strsim::jaro_winkler(&lowered, &name.to_lowercase()), name))
        .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(b.1))
    });
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, name)| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DefinitionDetail, FunctionInfo, VariableInfo};

    fn function(name: &str, file: &str, line: usize) -> Definition {
        Definition {
            name: name.to_string(),
            file: PathBuf::from(file),
            line_start: line,
            line_end: line + 1,
            scope: None,
            detail: DefinitionDetail::Function(FunctionInfo {
                signature: format!("def {name}()"),
                ..Default::default()
            }),
        }
    }

    fn variable(name: &str, file: &str, line: usize) -> Definition {
        Definition {
            name: name.to_string(),
            file: PathBuf::from(file),
            line_start: line,
            line_end: line,
            scope: None,
            detail: DefinitionDetail::Variable(VariableInfo {
                value_type: "int".to_string(),
                is_constant: false,
            }),
        }
    }

    fn names(response: &SearchResponse) -> Vec<(&str, &Path)> {
        response
            .matches
            .iter()
            .map(|m| (m.definition.name.as_str(), m.definition.file.as_path()))
            .collect()
    }

    #[test]
    fn exact_match_outranks_substring() {
        let defs = vec![
            function("load_config", "a.py", 1),
            function("load", "b.py", 1),
            function("reload", "c.py", 1),
        ];
        let response = search(&defs, "load", &SearchOptions::default());
        assert!(response.found);
        assert_eq!(
            names(&response),
            vec![
                ("load", Path::new("b.py")),
                ("load_config", Path::new("a.py")),
                ("reload", Path::new("c.py")),
            ]
        );
        assert_eq!(response.matches[0].relevance_score, 1.02);
    }

    #[test]
    fn case_insensitive_exact_beats_prefix() {
        let defs = vec![function("Parser", "a.py", 1), function("parse_all", "b.py", 1)];
        let response = search(&defs, "parser", &SearchOptions::default());
        assert_eq!(response.matches[0].definition.name, "Parser");
    }

    #[test]
    fn context_file_breaks_ties() {
        let defs = vec![function("run", "a.py", 1), function("run", "z.py", 1)];
        let options = SearchOptions {
            context_file: Some(PathBuf::from("z.py")),
            ..Default::default()
        };
        let response = search(&defs, "run", &options);
        assert_eq!(response.matches[0].definition.file, PathBuf::from("z.py"));

        let response = search(&defs, "run", &SearchOptions::default());
        assert_eq!(response.matches[0].definition.file, PathBuf::from("a.py"));
    }

    #[test]
    fn context_file_must_match_whole_path() {
        let defs = vec![function("run", "a.py", 1), function("run", "z.py", 1)];
        let options = SearchOptions {
            context_file: Some(PathBuf::from("pkg/z.py")),
            ..Default::default()
        };
        let response = search(&defs, "run", &options);
        assert_eq!(response.matches[0].definition.file, PathBuf::from("a.py"));
        assert_eq!(response.matches[0].relevance_score, 1.02);
        assert_eq!(response.matches[1].relevance_score, 1.02);
    }

    #[test]
    fn function_outranks_same_named_variable() {
        let defs = vec![variable("f", "a.py", 1), function("f", "b.py", 3)];
        let response = search(&defs, "f", &SearchOptions::default());
        assert_eq!(response.matches[0].definition.kind(), DefinitionKind::Function);
    }

    #[test]
    fn type_filter_restricts_kinds() {
        let defs = vec![variable("f", "a.py", 1), function("f", "b.py", 3)];
        let options = SearchOptions {
            type_filter: TypeFilter::Function,
            ..Default::default()
        };
        let response = search(&defs, "f", &options);
        assert_eq!(response.total_matches, 1);
        assert_eq!(response.matches[0].definition.file, PathBuf::from("b.py"));
    }

    #[test]
    fn results_truncate_but_report_total() {
        let defs: Vec<Definition> = (0..15)
            .map(|i| function(&format!("handler_{i}"), "h.py", i + 1))
            .collect();
        let response = search(&defs, "handler", &SearchOptions::default());
        assert_eq!(response.matches.len(), 10);
        assert_eq!(response.total_matches, 15);
    }

    #[test]
    fn no_match_is_not_an_error_and_suggests_names() {
        let defs = vec![function("calculate_total", "a.py", 1)];
        let response = search(&defs, "calculate_totl", &SearchOptions::default());
        assert!(!response.found);
        assert!(response.matches.is_empty());
        assert_eq!(response.suggestions, vec!["calculate_total"]);
    }

    #[test]
    fn empty_identifier_finds_nothing() {
        let defs = vec![function("a", "a.py", 1)];
        let response = search(&defs, "  ", &SearchOptions::default());
        assert!(!response.found);
        assert!(response.suggestions.is_empty());
    }
}
