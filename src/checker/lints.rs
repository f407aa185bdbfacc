//! Static-analysis rules run over a parsed tree.
//!
//! Each rule inspects one node kind and yields a warning. Style
//! opinions are left to the reasoning backend.

use super::syntax::{for_each_node, location_of};
use crate::models::{CheckerFinding, Language};
use tree_sitter::Node;

/// Run every rule for `language` over the tree rooted at `root`.
pub fn run(language: Language, root: Node<'_>, source: &[u8]) -> Vec<CheckerFinding> {
    let rule: fn(Node<'_>, &[u8]) -> Option<String> = match language {
        Language::Python => python_rule,
        Language::JavaScript => javascript_rule,
        Language::Cpp => cpp_rule,
    };

    let mut warnings = Vec::new();
    for_each_node(root, |node| {
        if node.is_error() || node.is_missing() {
            return;
        }
        if let Some(message) = rule(node, source) {
            warnings.push(CheckerFinding::warning(message, Some(location_of(node))));
        }
    });
    warnings
}

fn text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or_default()
}

fn has_child_kind(node: Node<'_>, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|child| child.kind() == kind);
    found
}

fn python_rule(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "except_clause" => {
            let mut cursor = node.walk();
            let bare = node
                .named_children(&mut cursor)
                .all(|child| matches!(child.kind(), "block" | "comment"));
            bare.then(|| {
                "bare 'except:' also catches KeyboardInterrupt and SystemExit; name the exception type"
                    .to_string()
            })
        }
        "comparison_operator" if has_child_kind(node, "none") => {
            if has_child_kind(node, "==") {
                Some("comparison to None should use 'is None'".to_string())
            } else if has_child_kind(node, "!=") {
                Some("comparison to None should use 'is not None'".to_string())
            } else {
                None
            }
        }
        "default_parameter" | "typed_default_parameter" => {
            let value = node.child_by_field_name("value")?;
            if !matches!(value.kind(), "list" | "dictionary" | "set") {
                return None;
            }
            let name = node
                .child_by_field_name("name")
                .map(|n| text(n, source))
                .unwrap_or("parameter");
            Some(format!(
                "mutable default argument '{}' is shared between calls; default to None instead",
                name
            ))
        }
        _ => None,
    }
}

fn javascript_rule(node: Node<'_>, _source: &[u8]) -> Option<String> {
    match node.kind() {
        "binary_expression" => {
            let operator = node.child_by_field_name("operator")?;
            match operator.kind() {
                "==" => Some("use '===' instead of '==' to avoid type coercion".to_string()),
                "!=" => Some("use '!==' instead of '!=' to avoid type coercion".to_string()),
                _ => None,
            }
        }
        "variable_declaration" => {
            Some("'var' is function-scoped; prefer 'let' or 'const'".to_string())
        }
        "debugger_statement" => Some("remove leftover 'debugger' statement".to_string()),
        _ => None,
    }
}

fn cpp_rule(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "using_declaration" => {
            let normalized: Vec<&str> = text(node, source).split_whitespace().collect();
            let is_std = normalized.len() >= 3
                && normalized[0] == "using"
                && normalized[1] == "namespace"
                && normalized[2].trim_end_matches(';') == "std";
            is_std.then(|| {
                "'using namespace std' pulls every std name into scope; qualify names instead"
                    .to_string()
            })
        }
        "call_expression" => {
            let function = node.child_by_field_name("function")?;
            (function.kind() == "identifier" && text(function, source) == "gets").then(|| {
                "'gets' cannot bound its input and was removed in C++14; use std::getline"
                    .to_string()
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::TreeSitterChecker;
    use crate::models::Severity;

    fn warnings(language: Language, code: &str) -> Vec<CheckerFinding> {
        TreeSitterChecker::new(language, 20)
            .analyze(code)
            .unwrap()
            .into_iter()
            .filter(|f| f.severity == Severity::Warning)
            .collect()
    }

    #[test]
    fn test_python_bare_except() {
        let code = "try:\n    run()\nexcept:\n    pass\n";
        let found = warnings(Language::Python, code);

        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("bare 'except:'"));
        assert_eq!(found[0].location.map(|l| l.line), Some(3));
    }

    #[test]
    fn test_python_typed_except_is_fine() {
        let code = "try:\n    run()\nexcept ValueError:\n    pass\n";
        assert!(warnings(Language::Python, code).is_empty());
    }

    #[test]
    fn test_python_none_comparison() {
        let found = warnings(Language::Python, "if x == None:\n    pass\n");
        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("is None"));

        assert!(warnings(Language::Python, "if x is None:\n    pass\n").is_empty());
    }

    #[test]
    fn test_python_mutable_default() {
        let found = warnings(Language::Python, "def f(items=[]):\n    return items\n");
        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("'items'"));
    }

    #[test]
    fn test_javascript_rules() {
        let code = "var a = 1;\nif (a == '1') {\n  debugger;\n}\n";
        let found = warnings(Language::JavaScript, code);
        let lines: Vec<_> = found.iter().filter_map(|f| f.location.map(|l| l.line)).collect();

        assert_eq!(found.len(), 3);
        assert_eq!(lines, vec![1, 2, 3]);
        assert!(found[1].message.contains("'==='"));
    }

    #[test]
    fn test_cpp_gets() {
        let code = "#include <cstdio>\nint main() {\n    char buf[16];\n    gets(buf);\n    return 0;\n}\n";
        let found = warnings(Language::Cpp, code);

        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("'gets'"));
        assert_eq!(found[0].location.map(|l| l.line), Some(4));
    }

    #[test]
    fn test_cpp_using_namespace_std() {
        let code = "#include <iostream>\nusing namespace std;\nint main() {\n    cout << 1;\n    return 0;\n}\n";
        let found = warnings(Language::Cpp, code);

        assert_eq!(found.len(), 1);
        assert!(found[0].message.contains("'using namespace std'"));
        assert_eq!(found[0].location.map(|l| l.line), Some(2));

        assert!(warnings(Language::Cpp, "using std::cout;\nint main() { return 0; }\n").is_empty());
    }
}
