use crate::impact::{ImpactPolicy, ImpactRule, Severity};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// Default directories skipped during file discovery.
pub const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    ".venv",
    "venv",
    "env",
    ".env",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    "node_modules",
    "dist",
    "build",
    "target",
];

/// Contents of `safe-edit.toml`. Every section is optional.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub library: LibrarySettings,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IndexSettings {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude_dirs: default_exclude_dirs(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["py".to_string()]
}

fn default_exclude_dirs() -> Vec<String> {
    DEFAULT_EXCLUDE_DIRS.iter().map(|d| d.to_string()).collect()
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SearchSettings {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

fn default_max_results() -> usize {
    10
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AnalysisSettings {
    #[serde(default)]
    pub block_at: Option<Severity>,
    /// Evaluated before the built-in rules.
    #[serde(default)]
    pub rules: Vec<ImpactRule>,
}

impl AnalysisSettings {
    pub fn policy(&self) -> ImpactPolicy {
        ImpactPolicy::with_overrides(&self.rules, self.block_at)
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LibrarySettings {
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.index.extensions.is_empty() {
            issues.push(ValidationIssue::EmptyExtensions);
        }
        for ext in &self.index.extensions {
            if ext.trim().is_empty() || ext.starts_with('.') {
                issues.push(ValidationIssue::InvalidExtension(ext.clone()));
            }
        }

        if self.search.max_results == 0 {
            issues.push(ValidationIssue::ZeroMaxResults);
        }

        let mut seen = HashSet::new();
        for rule in &self.analysis.rules {
            if !seen.insert(rule.when) {
                issues.push(ValidationIssue::DuplicateRule(
                    serde_name(&rule.when).unwrap_or_else(|| format!("{:?}", rule.when)),
                ));
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

fn serde_name<T: serde::Serialize>(value: &T) -> Option<String> {
    match serde_json::to_value(value).ok()? {
        serde_json::Value::String(name) => Some(name),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyExtensions,
    InvalidExtension(String),
    ZeroMaxResults,
    DuplicateRule(String),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyExtensions => write!(f, "index.extensions must not be empty"),
            ValidationIssue::InvalidExtension(ext) => write!(
                f,
                "index.extensions entry '{ext}' must be a bare extension like \"py\""
            ),
            ValidationIssue::ZeroMaxResults => write!(f, "search.max_results must be at least 1"),
            ValidationIssue::DuplicateRule(when) => {
                write!(f, "analysis.rules has more than one rule for '{when}'")
            }
        }
    }
}
