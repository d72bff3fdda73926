//! Call-site and reference collection.
//!
//! Usages feed the impact analyzer: a call `foo(a, b)` or `obj.foo(a, b)`
//! records `foo` with two arguments, and any other load of a bare name records
//! a reference. Names in binding positions (definition names, parameters,
//! assignment targets, import targets, keyword-argument names, attribute
//! selectors) are not usages.

use crate::definition::{Usage, UsageKind};
use std::path::Path;
use tree_sitter::Node;

/// Collect every usage under `root`, in document order.
pub fn collect_usages(root: Node<'_>, source: &str, file: &Path) -> Vec<Usage> {
    let mut usages = Vec::new();
    walk(root, source, file, &mut usages);
    usages
}

fn walk(node: Node<'_>, source: &str, file: &Path, out: &mut Vec<Usage>) {
    match node.kind() {
        "call" => {
            visit_call(node, source, file, out);
            return;
        }
        "import_statement" | "import_from_statement" | "future_import_statement" => return,
        "identifier" => {
            if is_reference(node) {
                out.push(Usage {
                    name: source[node.byte_range()].to_string(),
                    file: file.to_path_buf(),
                    line: node.start_position().row + 1,
                    kind: UsageKind::Reference,
                    arg_count: None,
                });
            }
            return;
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk(child, source, file, out);
    }
}

fn visit_call(call: Node<'_>, source: &str, file: &Path, out: &mut Vec<Usage>) {
    let arguments = call.child_by_field_name("arguments");
    let arg_count = arguments.map(count_arguments);

    if let Some(function) = call.child_by_field_name("function") {
        let callee = match function.kind() {
            "identifier" => Some(function),
            "attribute" => {
                if let Some(object) = function.child_by_field_name("object") {
                    walk(object, source, file, out);
                }
                function.child_by_field_name("attribute")
            }
            _ => {
                walk(function, source, file, out);
                None
            }
        };
        if let Some(callee) = callee {
            out.push(Usage {
                name: source[callee.byte_range()].to_string(),
                file: file.to_path_buf(),
                line: callee.start_position().row + 1,
                kind: UsageKind::Call,
                arg_count,
            });
        }
    }

    if let Some(arguments) = arguments {
        walk(arguments, source, file, out);
    }
}

fn count_arguments(arguments: Node<'_>) -> usize {
    if arguments.kind() == "generator_expression" {
        return 1;
    }
    let mut cursor = arguments.walk();
    arguments
        .named_children(&mut cursor)
        .filter(|arg| arg.kind() != "comment")
        .count()
}

/// Whether an identifier is read rather than bound or used as a selector.
fn is_reference(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return true;
    };
    let is_field = |field: &str| parent.child_by_field_name(field) == Some(node);

    match parent.kind() {
        "function_definition" | "class_definition" => !is_field("name"),
        "parameters" | "lambda_parameters" => false,
        "default_parameter" | "typed_default_parameter" => !is_field("name"),
        "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => {
            // Splat patterns inside a parameter list bind; elsewhere they read.
            !matches!(
                parent.parent().map(|p| p.kind()),
                Some("parameters" | "lambda_parameters" | "typed_parameter")
            ) && parent.kind() != "typed_parameter"
        }
        "attribute" => !is_field("attribute"),
        "keyword_argument" => !is_field("name"),
        "assignment" | "augmented_assignment" => !is_field("left"),
        "for_statement" | "for_in_clause" => !is_field("left"),
        "pattern_list" | "tuple_pattern" | "list_pattern" => false,
        "as_pattern_target" | "aliased_import" | "dotted_name" | "global_statement"
        | "nonlocal_statement" => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use crate::definition::UsageKind;
    use crate::ts::indexer::index_source;

    fn usages(source: &str) -> Vec<(String, UsageKind, Option<usize>)> {
        index_source("u.py", source)
            .unwrap()
            .usages
            .into_iter()
            .map(|u| (u.name, u.kind, u.arg_count))
            .collect()
    }

    #[test]
    fn records_calls_with_argument_counts() {
        let found = usages("process(a, b)\nobj.helper(1)\nrun()\n");
        assert!(found.contains(&("process".into(), UsageKind::Call, Some(2))));
        assert!(found.contains(&("helper".into(), UsageKind::Call, Some(1))));
        assert!(found.contains(&("run".into(), UsageKind::Call, Some(0))));
        // The receiver of a method call is a reference.
        assert!(found.contains(&("obj".into(), UsageKind::Reference, None)));
    }

    #[test]
    fn binding_positions_are_not_usages() {
        let source = "def f(x, y=1, *rest, **opts):\n    total = x\n    return total\n";
        let names: Vec<String> = usages(source).into_iter().map(|(n, _, _)| n).collect();
        assert!(!names.contains(&"f".to_string()));
        assert!(!names.contains(&"y".to_string()));
        assert!(!names.contains(&"rest".to_string()));
        // `total = x` reads x; `return total` reads total.
        assert_eq!(names.iter().filter(|n| *n == "x").count(), 1);
        assert_eq!(names.iter().filter(|n| *n == "total").count(), 1);
    }

    #[test]
    fn keyword_names_and_attributes_are_skipped() {
        let names: Vec<String> = usages("configure(level=DEBUG)\nvalue = cfg.level\n")
            .into_iter()
            .map(|(n, _, _)| n)
            .collect();
        assert_eq!(names, vec!["configure", "DEBUG", "cfg"]);
    }

    #[test]
    fn class_bases_are_references() {
        let found = usages("class Child(Base):\n    pass\n");
        assert_eq!(found, vec![("Base".into(), UsageKind::Reference, None)]);
    }

    #[test]
    fn imports_are_not_usages() {
        assert!(usages("import os\nfrom a import b as c\n").is_empty());
    }
}
