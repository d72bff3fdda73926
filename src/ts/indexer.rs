//! Python definition extraction.
//!
//! Walks a tree-sitter CST and turns function, class, assignment and import
//! nodes into [`Definition`]s, in source order. A file whose tree carries any
//! ERROR/MISSING node is rejected with a [`ParseError`] pointing at the first
//! one; callers record the failure and move on to the next file.

use crate::definition::{
    is_constant_name, ClassInfo, Definition, DefinitionDetail, FileSymbols, FunctionInfo,
    ImportInfo, ImportStyle, VariableInfo,
};
use crate::pool;
use crate::ts::errors::{ParseError, TreeSitterError};
use crate::ts::parser::ParsedSource;
use crate::ts::usages::collect_usages;
use std::fs;
use std::path::{Path, PathBuf};
use tree_sitter::Node;

/// Parse `source` (the content of `file`) into definitions and usages.
pub fn index_source(file: impl AsRef<Path>, source: &str) -> Result<FileSymbols, ParseError> {
    let file = file.as_ref();
    let tree = pool::with_parser(|parser| parser.parse(source))
        .and_then(|parsed| parsed)
        .map_err(|e| ParseError::new(file, None, e.to_string()))?;
    let parsed = ParsedSource { source, tree };

    if let Some(TreeSitterError::SyntaxError { line, .. }) = parsed.first_syntax_error() {
        return Err(ParseError::new(file, Some(line), "invalid syntax"));
    }

    let root = parsed.root_node();
    let mut extractor = Extractor {
        source,
        file: file.to_path_buf(),
        definitions: Vec::new(),
    };
    let mut scope = Vec::new();
    extractor.visit_children(root, &mut scope, false);

    let usages = collect_usages(root, source, file);

    tracing::debug!(
        file = %file.display(),
        definitions = extractor.definitions.len(),
        usages = usages.len(),
        "indexed file"
    );

    Ok(FileSymbols {
        definitions: extractor.definitions,
        usages,
    })
}

/// Read `root/relative` from disk and index it, recording `relative` as the file.
pub fn index_file(root: &Path, relative: &Path) -> Result<FileSymbols, ParseError> {
    let bytes = fs::read(root.join(relative))
        .map_err(|e| ParseError::new(relative, None, format!("cannot read file: {e}")))?;
    let source = String::from_utf8(bytes)
        .map_err(|_| ParseError::new(relative, None, "file is not valid UTF-8"))?;
    index_source(relative, &source)
}

struct Extractor<'a> {
    source: &'a str,
    file: PathBuf,
    definitions: Vec<Definition>,
}

impl<'a> Extractor<'a> {
    fn text(&self, node: Node<'_>) -> &'a str {
        &self.source[node.byte_range()]
    }

    fn field_text(&self, node: Node<'_>, field: &str) -> Option<String> {
        node.child_by_field_name(field)
            .map(|child| self.text(child).to_string())
    }

    fn visit_children(&mut self, node: Node<'_>, scope: &mut Vec<String>, in_function: bool) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, scope, in_function);
        }
    }

    fn visit(&mut self, node: Node<'_>, scope: &mut Vec<String>, in_function: bool) {
        match node.kind() {
            "decorated_definition" => {
                let decorators = self.decorators(node);
                if let Some(definition) = node.child_by_field_name("definition") {
                    match definition.kind() {
                        "function_definition" => {
                            self.function(definition, node, decorators, scope)
                        }
                        "class_definition" => self.class(definition, node, decorators, scope),
                        _ => self.visit(definition, scope, in_function),
                    }
                }
            }
            "function_definition" => self.function(node, node, Vec::new(), scope),
            "class_definition" => self.class(node, node, Vec::new(), scope),
            "expression_statement" => {
                if !in_function {
                    let mut cursor = node.walk();
                    let assignments: Vec<Node<'_>> = node
                        .named_children(&mut cursor)
                        .filter(|child| child.kind() == "assignment")
                        .collect();
                    for assignment in assignments {
                        self.variable(assignment, scope);
                    }
                }
            }
            "import_statement" => self.import(node, scope),
            "import_from_statement" | "future_import_statement" => self.import_from(node, scope),
            _ => self.visit_children(node, scope, in_function),
        }
    }

    fn decorators(&self, decorated: Node<'_>) -> Vec<String> {
        let mut cursor = decorated.walk();
        decorated
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "decorator")
            .map(|decorator| self.text(decorator).trim_start_matches('@').trim().to_string())
            .collect()
    }

    fn scope_name(scope: &[String]) -> Option<String> {
        if scope.is_empty() {
            None
        } else {
            Some(scope.join("."))
        }
    }

    fn function(
        &mut self,
        node: Node<'_>,
        outer: Node<'_>,
        decorators: Vec<String>,
        scope: &mut Vec<String>,
    ) {
        let Some(name) = self.field_text(node, "name") else {
            return;
        };

        let mut cursor = node.walk();
        let is_async = node.children(&mut cursor).any(|child| child.kind() == "async");

        let params = node.child_by_field_name("parameters");
        let args = params.map(|p| self.parameter_names(p)).unwrap_or_default();
        let params_text = params
            .map(|p| normalize_whitespace(self.text(p)))
            .unwrap_or_else(|| "()".to_string());
        let mut signature = format!(
            "{}def {}{}",
            if is_async { "async " } else { "" },
            name,
            params_text
        );
        if let Some(ret) = self.field_text(node, "return_type") {
            signature.push_str(" -> ");
            signature.push_str(&normalize_whitespace(&ret));
        }

        let body = node.child_by_field_name("body");
        let docstring = body.and_then(|b| self.docstring(b));

        self.definitions.push(Definition {
            name: name.clone(),
            file: self.file.clone(),
            line_start: outer.start_position().row + 1,
            line_end: outer.end_position().row + 1,
            scope: Self::scope_name(scope),
            detail: DefinitionDetail::Function(FunctionInfo {
                signature,
                args,
                is_async,
                docstring,
                decorators,
            }),
        });

        if let Some(body) = body {
            scope.push(name);
            self.visit_children(body, scope, true);
            scope.pop();
        }
    }

    fn class(
        &mut self,
        node: Node<'_>,
        outer: Node<'_>,
        decorators: Vec<String>,
        scope: &mut Vec<String>,
    ) {
        let Some(name) = self.field_text(node, "name") else {
            return;
        };

        let inheritance = node
            .child_by_field_name("superclasses")
            .map(|bases| {
                let mut cursor = bases.walk();
                bases
                    .named_children(&mut cursor)
                    .filter(|b| !matches!(b.kind(), "keyword_argument" | "comment"))
                    .map(|b| normalize_whitespace(self.text(b)))
                    .collect()
            })
            .unwrap_or_default();

        let body = node.child_by_field_name("body");
        let methods = body.map(|b| self.method_names(b)).unwrap_or_default();
        let docstring = body.and_then(|b| self.docstring(b));

        self.definitions.push(Definition {
            name: name.clone(),
            file: self.file.clone(),
            line_start: outer.start_position().row + 1,
            line_end: outer.end_position().row + 1,
            scope: Self::scope_name(scope),
            detail: DefinitionDetail::Class(ClassInfo {
                methods,
                inheritance,
                docstring,
                decorators,
            }),
        });

        if let Some(body) = body {
            scope.push(name);
            self.visit_children(body, scope, false);
            scope.pop();
        }
    }

    fn method_names(&self, body: Node<'_>) -> Vec<String> {
        let mut cursor = body.walk();
        body.named_children(&mut cursor)
            .filter_map(|child| match child.kind() {
                "function_definition" => Some(child),
                "decorated_definition" => child
                    .child_by_field_name("definition")
                    .filter(|d| d.kind() == "function_definition"),
                _ => None,
            })
            .filter_map(|f| self.field_text(f, "name"))
            .collect()
    }

    fn parameter_names(&self, params: Node<'_>) -> Vec<String> {
        let mut cursor = params.walk();
        params
            .named_children(&mut cursor)
            .filter_map(|param| match param.kind() {
                "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                    Some(self.text(param).to_string())
                }
                "default_parameter" | "typed_default_parameter" => {
                    self.field_text(param, "name")
                }
                "typed_parameter" => param
                    .named_child(0)
                    .map(|inner| self.text(inner).to_string()),
                _ => None,
            })
            .collect()
    }

    fn docstring(&self, body: Node<'_>) -> Option<String> {
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let literal = first.named_child(0)?;
        if literal.kind() != "string" {
            return None;
        }
        let text = strip_string_literal(self.text(literal));
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    fn variable(&mut self, assignment: Node<'_>, scope: &[String]) {
        let Some(left) = assignment.child_by_field_name("left") else {
            return;
        };
        if left.kind() != "identifier" {
            return;
        }
        let name = self.text(left).to_string();
        let value_type = match assignment.child_by_field_name("right") {
            Some(right) => value_type_tag(right, self.source),
            None => assignment
                .child_by_field_name("type")
                .map(|t| normalize_whitespace(self.text(t)))
                .unwrap_or_else(|| "unknown".to_string()),
        };
        let line = assignment.start_position().row + 1;

        let definition = variable_definition(&self.file, name, line, value_type, scope);
        self.definitions.push(definition);
    }

    fn import(&mut self, node: Node<'_>, scope: &[String]) {
        let line = node.start_position().row + 1;
        let mut cursor = node.walk();
        let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
        for target in names {
            let (module, alias) = match target.kind() {
                "aliased_import" => (
                    self.field_text(target, "name").unwrap_or_default(),
                    self.field_text(target, "alias"),
                ),
                _ => (self.text(target).to_string(), None),
            };
            let name = alias.clone().unwrap_or_else(|| module.clone());
            self.push_import(name, line, scope, ImportInfo {
                module,
                from_name: None,
                alias,
                import_type: ImportStyle::Import,
            });
        }
    }

    fn import_from(&mut self, node: Node<'_>, scope: &[String]) {
        let line = node.start_position().row + 1;
        let module = if node.kind() == "future_import_statement" {
            "__future__".to_string()
        } else {
            self.field_text(node, "module_name").unwrap_or_default()
        };

        let mut cursor = node.walk();
        let has_wildcard = node
            .named_children(&mut cursor)
            .any(|child| child.kind() == "wildcard_import");
        if has_wildcard {
            self.push_import("*".to_string(), line, scope, ImportInfo {
                module: module.clone(),
                from_name: Some("*".to_string()),
                alias: None,
                import_type: ImportStyle::From,
            });
        }

        let mut cursor = node.walk();
        let names: Vec<Node<'_>> = node.children_by_field_name("name", &mut cursor).collect();
        for target in names {
            let (from_name, alias) = match target.kind() {
                "aliased_import" => (
                    self.field_text(target, "name").unwrap_or_default(),
                    self.field_text(target, "alias"),
                ),
                _ => (self.text(target).to_string(), None),
            };
            let name = alias.clone().unwrap_or_else(|| from_name.clone());
            self.push_import(name, line, scope, ImportInfo {
                module: module.clone(),
                from_name: Some(from_name),
                alias,
                import_type: ImportStyle::From,
            });
        }
    }

    fn push_import(&mut self, name: String, line: usize, scope: &[String], info: ImportInfo) {
        self.definitions.push(Definition {
            name,
            file: self.file.clone(),
            line_start: line,
            line_end: line,
            scope: Self::scope_name(scope),
            detail: DefinitionDetail::Import(info),
        });
    }
}

fn variable_definition(
    file: &Path,
    name: String,
    line: usize,
    value_type: String,
    scope: &[String],
) -> Definition {
    let is_constant = is_constant_name(&name);
    Definition {
        name,
        file: file.to_path_buf(),
        line_start: line,
        line_end: line,
        scope: if scope.is_empty() {
            None
        } else {
            Some(scope.join("."))
        },
        detail: DefinitionDetail::Variable(VariableInfo {
            value_type,
            is_constant,
        }),
    }
}

/// Tag describing the value bound by an assignment's right-hand side.
fn value_type_tag(node: Node<'_>, source: &str) -> String {
    let tag = match node.kind() {
        "integer" => "int",
        "float" => "float",
        "string" | "concatenated_string" => "str",
        "true" | "false" => "bool",
        "none" => "None",
        "list" => "list",
        "dictionary" => "dict",
        "tuple" => "tuple",
        "set" => "set",
        "call" => "call",
        "lambda" => "lambda",
        "list_comprehension"
        | "dictionary_comprehension"
        | "set_comprehension"
        | "generator_expression" => "comprehension",
        "unary_operator" => {
            return node
                .child_by_field_name("argument")
                .map(|arg| value_type_tag(arg, source))
                .unwrap_or_else(|| "expression".to_string());
        }
        "parenthesized_expression" => {
            return node
                .named_child(0)
                .map(|inner| value_type_tag(inner, source))
                .unwrap_or_else(|| "expression".to_string());
        }
        "assignment" => {
            // a = b = value
            return node
                .child_by_field_name("right")
                .map(|right| value_type_tag(right, source))
                .unwrap_or_else(|| "expression".to_string());
        }
        _ => "expression",
    };
    tag.to_string()
}

/// Collapse whitespace runs (multi-line parameter lists) into single spaces.
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("( ", "(")
        .replace(" )", ")")
        .replace("[ ", "[")
        .replace(" ]", "]")
}

/// Remove string prefix and quotes from a literal.
fn strip_string_literal(raw: &str) -> String {
    let body = raw.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if body.len() >= 2 * quote.len() && body.starts_with(quote) && body.ends_with(quote) {
            return body[quote.len()..body.len() - quote.len()].trim().to_string();
        }
    }
    body.trim().to_string()
}
