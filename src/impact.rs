//! Impact analysis for proposed edits.
//!
//! The definitions of the file as it is now are compared with a re-parse of
//! the proposed content. Only definitions whose span intersects an edited range
//! are considered; they are paired with proposed definitions by
//! `(kind, scope, name)`. Each detected [`Change`] is classified by an ordered
//! ruleset ([`ImpactPolicy`]) into an [`ImpactWarning`], and the policy's
//! `block_at` threshold decides whether the edit may proceed.

use crate::definition::{Definition, DefinitionDetail, DefinitionKind, FileSymbols};
use crate::edit::PatchOutput;
use crate::index::ProjectIndex;
use crate::ts;
use crate::validate::{self, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    DefinitionRemoved,
    ParametersChanged,
    BasesChanged,
    BodyChanged,
    SyntaxErrorIntroduced,
}

/// A structural difference between current and proposed content.
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ChangeKind,
    /// The definition as it exists before the edit.
    pub definition: Option<Definition>,
    /// Indexed usages of the definition's name (other files + proposed file).
    pub usage_count: usize,
    pub detail: String,
}

/// Rule predicate over a [`Change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    RemovedWithUsages,
    RemovedUnused,
    SyntaxErrorIntroduced,
    ParametersChanged,
    BasesChanged,
    BodyChangedWithCallers,
    BodyChanged,
}

impl Predicate {
    pub fn matches(self, change: &Change) -> bool {
        match self {
            Predicate::RemovedWithUsages => {
                change.kind == ChangeKind::DefinitionRemoved && change.usage_count > 0
            }
            Predicate::RemovedUnused => {
                change.kind == ChangeKind::DefinitionRemoved && change.usage_count == 0
            }
            Predicate::SyntaxErrorIntroduced => change.kind == ChangeKind::SyntaxErrorIntroduced,
            Predicate::ParametersChanged => change.kind == ChangeKind::ParametersChanged,
            Predicate::BasesChanged => change.kind == ChangeKind::BasesChanged,
            Predicate::BodyChangedWithCallers => {
                change.kind == ChangeKind::BodyChanged && change.usage_count > 0
            }
            Predicate::BodyChanged => change.kind == ChangeKind::BodyChanged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactRule {
    pub when: Predicate,
    pub severity: Severity,
}

/// Ordered ruleset plus blocking threshold. First matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactPolicy {
    pub rules: Vec<ImpactRule>,
    /// Warnings at or above this severity block the edit. `None` never blocks.
    pub block_at: Option<Severity>,
}

impl Default for ImpactPolicy {
    fn default() -> Self {
        Self {
            rules: Self::default_rules(),
            block_at: None,
        }
    }
}

impl ImpactPolicy {
    pub fn default_rules() -> Vec<ImpactRule> {
        use Predicate::*;
        [
            (RemovedWithUsages, Severity::High),
            (SyntaxErrorIntroduced, Severity::High),
            (ParametersChanged, Severity::Medium),
            (BasesChanged, Severity::Medium),
            (RemovedUnused, Severity::Low),
            (BodyChangedWithCallers, Severity::Low),
        ]
        .into_iter()
        .map(|(when, severity)| ImpactRule { when, severity })
        .collect()
    }

    /// Configured rules first, then the defaults they do not override.
    pub fn with_overrides(overrides: &[ImpactRule], block_at: Option<Severity>) -> Self {
        let mut rules = overrides.to_vec();
        rules.extend(
            Self::default_rules()
                .into_iter()
                .filter(|rule| overrides.iter().all(|o| o.when != rule.when)),
        );
        Self { rules, block_at }
    }

    pub fn classify(&self, change: &Change) -> Option<Severity> {
        self.rules
            .iter()
            .find(|rule| rule.when.matches(change))
            .map(|rule| rule.severity)
    }

    pub fn blocks(&self, severity: Severity) -> bool {
        self.block_at.is_some_and(|threshold| severity >= threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactWarning {
    pub kind: ChangeKind,
    pub severity: Severity,
    pub message: String,
    /// Label of the affected definition, e.g. `function 'f' (m.py:1)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_definition: Option<String>,
    pub usage_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImpactReport {
    pub warnings: Vec<ImpactWarning>,
    pub should_proceed: bool,
    pub recommendations: Vec<String>,
}

impl ImpactReport {
    pub fn highest_severity(&self) -> Option<Severity> {
        self.warnings.iter().map(|w| w.severity).max()
    }

    /// Warnings the policy treats as blocking.
    pub fn blocking<'a>(&'a self, policy: &'a ImpactPolicy) -> impl Iterator<Item = &'a ImpactWarning> {
        self.warnings.iter().filter(|w| policy.blocks(w.severity))
    }
}

/// Analyze the effect of replacing `original` with `patch.content` in `file`.
///
/// Read-only on the index.
pub fn analyze(
    file: &Path,
    original: &str,
    patch: &PatchOutput,
    index: &ProjectIndex,
    policy: &ImpactPolicy,
) -> ImpactReport {
    let changes = detect_changes(file, original, patch, index);

    let warnings: Vec<ImpactWarning> = changes
        .iter()
        .filter_map(|change| {
            let severity = policy.classify(change)?;
            Some(ImpactWarning {
                kind: change.kind,
                severity,
                message: change.detail.clone(),
                related_definition: change.definition.as_ref().map(Definition::label),
                usage_count: change.usage_count,
            })
        })
        .collect();

    let should_proceed = !warnings.iter().any(|w| policy.blocks(w.severity));
    let recommendations = recommendations(&warnings);

    for warning in &warnings {
        tracing::debug!(
            file = %file.display(),
            kind = ?warning.kind,
            severity = %warning.severity,
            "impact warning"
        );
    }

    ImpactReport {
        warnings,
        should_proceed,
        recommendations,
    }
}

/// Compute structural changes without applying any policy.
pub fn detect_changes(
    file: &Path,
    original: &str,
    patch: &PatchOutput,
    index: &ProjectIndex,
) -> Vec<Change> {
    let mut changes = Vec::new();

    if let Err(err @ ValidationError::ParseErrorIntroduced { .. }) =
        validate::pooled::validate_edit(original, &patch.content)
    {
        let line = err.first_line().unwrap_or(0);
        changes.push(Change {
            kind: ChangeKind::SyntaxErrorIntroduced,
            definition: None,
            usage_count: 0,
            detail: format!("Edit introduces a syntax error near line {line}"),
        });
    }

    let before = match ts::index_source(file, original) {
        Ok(symbols) => symbols,
        Err(_) => match index.file_entry(file) {
            Some(entry) => entry.clone(),
            None => return changes,
        },
    };
    let after = match ts::index_source(file, &patch.content) {
        Ok(symbols) => symbols,
        // Nothing to compare against; the syntax change (if new) was recorded above.
        Err(_) => return changes,
    };

    let original_lines: Vec<&str> = original.lines().collect();
    let proposed_lines: Vec<&str> = patch.content.lines().collect();

    let touched: Vec<&Definition> = before
        .definitions
        .iter()
        .filter(|def| {
            patch
                .ranges
                .iter()
                .any(|r| def.overlaps(r.original_start, r.original_end))
        })
        .collect();

    let mut claimed = vec![false; after.definitions.len()];

    for def in touched {
        let usage_count = count_usages(&def.name, file, index, &after);
        let counterpart = after
            .definitions
            .iter()
            .enumerate()
            .filter(|(i, candidate)| !claimed[*i] && same_key(def, candidate))
            .min_by_key(|(_, candidate)| candidate.line_start.abs_diff(def.line_start));

        let Some((i, new_def)) = counterpart else {
            changes.push(Change {
                kind: ChangeKind::DefinitionRemoved,
                definition: Some(def.clone()),
                usage_count,
                detail: removal_message(def, usage_count),
            });
            continue;
        };
        claimed[i] = true;

        if let Some(change) = compare(def, new_def, usage_count, &original_lines, &proposed_lines) {
            changes.push(change);
        }
    }

    suppress_enclosing_body_changes(changes)
}

fn same_key(a: &Definition, b: &Definition) -> bool {
    a.kind() == b.kind() && a.scope == b.scope && a.name == b.name
}

fn count_usages(name: &str, file: &Path, index: &ProjectIndex, after: &FileSymbols) -> usize {
    let elsewhere = index
        .usages_of(name)
        .filter(|usage| usage.file != file)
        .count();
    let local = after.usages.iter().filter(|usage| usage.name == name).count();
    elsewhere + local
}

fn span_text<'a>(lines: &[&'a str], def: &Definition) -> Vec<&'a str> {
    let start = def.line_start.saturating_sub(1).min(lines.len());
    let end = def.line_end.min(lines.len()).max(start);
    lines[start..end].iter().map(|line| line.trim_end()).collect()
}

fn compare(
    old: &Definition,
    new: &Definition,
    usage_count: usize,
    original_lines: &[&str],
    proposed_lines: &[&str],
) -> Option<Change> {
    let change = |kind, detail| Change {
        kind,
        definition: Some(old.clone()),
        usage_count,
        detail,
    };

    match (&old.detail, &new.detail) {
        (DefinitionDetail::Function(a), DefinitionDetail::Function(b)) if a.args != b.args => {
            return Some(change(
                ChangeKind::ParametersChanged,
                format!(
                    "Function '{}' parameters changed: ({}) -> ({}); {} usage(s) may need updating",
                    old.qualified_name(),
                    a.args.join(", "),
                    b.args.join(", "),
                    usage_count
                ),
            ));
        }
        (DefinitionDetail::Class(a), DefinitionDetail::Class(b))
            if a.inheritance != b.inheritance =>
        {
            return Some(change(
                ChangeKind::BasesChanged,
                format!(
                    "Class '{}' bases changed: ({}) -> ({})",
                    old.qualified_name(),
                    a.inheritance.join(", "),
                    b.inheritance.join(", ")
                ),
            ));
        }
        _ => {}
    }

    if span_text(original_lines, old) == span_text(proposed_lines, new) {
        return None;
    }
    Some(change(
        ChangeKind::BodyChanged,
        format!(
            "{} '{}' modified; {} usage(s) in the project",
            capitalize(old.kind().as_str()),
            old.qualified_name(),
            usage_count
        ),
    ))
}

fn removal_message(def: &Definition, usage_count: usize) -> String {
    let what = match def.kind() {
        DefinitionKind::Import => "Import",
        DefinitionKind::Function => "Function",
        DefinitionKind::Class => "Class",
        DefinitionKind::Variable => "Variable",
    };
    if usage_count > 0 {
        format!(
            "{what} '{}' removed but still used {usage_count} time(s)",
            def.qualified_name()
        )
    } else {
        format!("{what} '{}' removed; no indexed usages", def.qualified_name())
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Drop a body change on a class/function when a nested definition already
/// explains the edit.
fn suppress_enclosing_body_changes(changes: Vec<Change>) -> Vec<Change> {
    let nested_scopes: Vec<String> = changes
        .iter()
        .filter_map(|c| c.definition.as_ref()?.scope.clone())
        .collect();

    changes
        .into_iter()
        .filter(|change| {
            if change.kind != ChangeKind::BodyChanged {
                return true;
            }
            let Some(def) = &change.definition else {
                return true;
            };
            let qualified = def.qualified_name();
            !nested_scopes
                .iter()
                .any(|scope| scope == &qualified || scope.starts_with(&format!("{qualified}.")))
        })
        .collect()
}

fn recommendations(warnings: &[ImpactWarning]) -> Vec<String> {
    let mut out = Vec::new();
    let mut push = |text: &str| {
        if !out.iter().any(|existing| existing == text) {
            out.push(text.to_string());
        }
    };
    for warning in warnings {
        match warning.kind {
            ChangeKind::DefinitionRemoved if warning.usage_count > 0 => {
                push("Search for remaining usages and update or remove them")
            }
            ChangeKind::ParametersChanged => push("Update call sites to match the new parameters"),
            ChangeKind::BasesChanged => push("Check subclasses and isinstance checks for the class"),
            ChangeKind::SyntaxErrorIntroduced => push("Fix the syntax error before continuing"),
            ChangeKind::BodyChanged if warning.usage_count > 0 => {
                push("Run tests covering the callers of the modified definition")
            }
            _ => {}
        }
    }
    out
}
