//! Tree-sitter based syntax checker.
//!
//! Parses the snippet with the language's grammar, reports the first
//! fatal parse error, and runs the lint rules over the same tree.

use super::lints;
use super::{CheckError, LanguageChecker};
use crate::models::{sort_findings, CheckerFinding, Language, Location};
use async_trait::async_trait;
use tree_sitter::{Node, Parser as TsParser, Tree};

/// Longest source excerpt quoted in a parse error message.
const MAX_EXCERPT_CHARS: usize = 30;

/// Compound statement keywords whose header must end in `:`.
const PYTHON_BLOCK_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "for", "while", "def", "class", "try", "except", "finally", "with",
];

/// In-process checker backed by a tree-sitter grammar.
#[derive(Clone)]
pub struct TreeSitterChecker {
    language: Language,
    grammar: tree_sitter::Language,
    max_warnings: usize,
}

impl TreeSitterChecker {
    pub fn new(language: Language, max_warnings: usize) -> Self {
        let grammar = match language {
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        };

        Self {
            language,
            grammar,
            max_warnings,
        }
    }

    fn parse(&self, code: &str) -> Result<Tree, CheckError> {
        let mut parser = TsParser::new();
        parser.set_language(&self.grammar).map_err(|e| {
            CheckError::CheckerUnavailable(format!(
                "{} grammar failed to load: {}",
                self.language, e
            ))
        })?;
        parser
            .parse(code, None)
            .ok_or_else(|| CheckError::CheckerUnavailable("parser produced no tree".to_string()))
    }

    /// Synchronous check; `check` runs this on the blocking pool.
    pub fn analyze(&self, code: &str) -> Result<Vec<CheckerFinding>, CheckError> {
        let tree = self.parse(code)?;
        let root = tree.root_node();
        let source = code.as_bytes();

        let mut findings = Vec::new();
        if root.has_error() {
            if let Some(error) = self.first_syntax_error(root, code) {
                findings.push(error);
            }
        }

        let mut warnings = lints::run(self.language, root, source);
        sort_findings(&mut warnings);
        warnings.truncate(self.max_warnings);
        findings.extend(warnings);

        sort_findings(&mut findings);
        Ok(findings)
    }

    fn first_syntax_error(&self, root: Node<'_>, code: &str) -> Option<CheckerFinding> {
        let node = earliest_error_node(root)?;
        let location = location_of(node);

        if self.language == Language::Python {
            let masked = mask_literals(root, code);
            if let Some(finding) = python_missing_colon(&masked, location.line) {
                return Some(finding);
            }
        }

        Some(CheckerFinding::error(
            describe_error(node, code.as_bytes()),
            Some(location),
        ))
    }
}

#[async_trait]
impl LanguageChecker for TreeSitterChecker {
    fn name(&self) -> &str {
        "tree-sitter"
    }

    async fn check(&self, code: &str) -> Result<Vec<CheckerFinding>, CheckError> {
        let checker = self.clone();
        let code = code.to_string();

        tokio::task::spawn_blocking(move || checker.analyze(&code))
            .await
            .map_err(|e| CheckError::CheckerUnavailable(format!("checker task failed: {}", e)))?
    }
}

/// Visit every node in document order without recursion.
pub(crate) fn for_each_node<'tree>(root: Node<'tree>, mut visit: impl FnMut(Node<'tree>)) {
    let mut cursor = root.walk();
    loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// 1-indexed start position of a node.
pub(crate) fn location_of(node: Node<'_>) -> Location {
    let point = node.start_position();
    Location {
        line: point.row + 1,
        column: point.column + 1,
    }
}

/// The ERROR or MISSING node that starts first. On a tie a MISSING node wins,
/// since it names the token the parser wanted.
fn earliest_error_node(root: Node<'_>) -> Option<Node<'_>> {
    let mut best: Option<Node<'_>> = None;

    for_each_node(root, |node| {
        if !node.is_error() && !node.is_missing() {
            return;
        }
        let replace = match best {
            None => true,
            Some(current) => {
                let (pos, cur) = (node.start_position(), current.start_position());
                (pos.row, pos.column) < (cur.row, cur.column)
                    || (pos == cur && node.is_missing() && !current.is_missing())
            }
        };
        if replace {
            best = Some(node);
        }
    });

    best
}

fn describe_error(node: Node<'_>, source: &[u8]) -> String {
    if node.is_missing() {
        let kind = node.kind();
        return if kind.chars().all(|c| c.is_alphanumeric() || c == '_') {
            format!("expected {}", kind.replace('_', " "))
        } else {
            format!("expected '{}'", kind)
        };
    }

    let text = node.utf8_text(source).unwrap_or_default();
    let first_line = text.lines().next().unwrap_or_default().trim();
    if first_line.is_empty() {
        return "invalid syntax".to_string();
    }

    let excerpt: String = first_line.chars().take(MAX_EXCERPT_CHARS).collect();
    if excerpt.len() < first_line.len() {
        format!("invalid syntax near '{}...'", excerpt)
    } else {
        format!("invalid syntax near '{}'", excerpt)
    }
}

/// Copy of `code` with string literals turned into `_` runs and comments
/// into spaces, so brackets, colons and `#` inside them are never read as
/// syntax. Byte offsets and line breaks are preserved.
fn mask_literals(root: Node<'_>, code: &str) -> String {
    let mut bytes = code.as_bytes().to_vec();

    for_each_node(root, |node| {
        let fill = match node.kind() {
            "string" => b'_',
            "comment" => b' ',
            _ => return,
        };
        let end = node.end_byte().min(bytes.len());
        for byte in &mut bytes[node.start_byte().min(end)..end] {
            if *byte != b'\n' && *byte != b'\r' {
                *byte = fill;
            }
        }
    });

    String::from_utf8(bytes).unwrap_or_else(|_| code.to_string())
}

/// Find a block header at or before `up_to_line` that lacks its `:`.
///
/// Expects literals already masked. Works on logical lines: bracketed
/// continuations and trailing backslashes are joined before the header
/// is inspected.
fn python_missing_colon(masked: &str, up_to_line: usize) -> Option<CheckerFinding> {
    let mut depth: i32 = 0;
    let mut logical = String::new();
    let mut start_line = 0;
    let mut first_physical = "";

    for (index, raw) in masked.lines().enumerate() {
        let line_number = index + 1;
        if line_number > up_to_line && depth == 0 {
            break;
        }

        let line = strip_comment(raw);
        if logical.is_empty() {
            if line.trim().is_empty() {
                continue;
            }
            start_line = line_number;
            first_physical = line;
        }

        for c in line.chars() {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                _ => {}
            }
        }
        logical.push_str(line.trim_end().trim_end_matches('\\'));
        logical.push(' ');

        if depth > 0 || line.trim_end().ends_with('\\') {
            continue;
        }
        depth = 0;

        if is_block_header(&logical) && !has_top_level_colon(&logical) {
            return Some(CheckerFinding::error(
                "expected ':'",
                Some(Location {
                    line: start_line,
                    column: first_physical.trim_end().len() + 1,
                }),
            ));
        }
        logical.clear();
    }

    None
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// True when a `:` appears outside every bracket pair. Walrus `:=` does
/// not count.
fn has_top_level_colon(logical: &str) -> bool {
    let mut depth: i32 = 0;
    let mut chars = logical.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ':' if depth <= 0 && chars.peek() != Some(&'=') => return true,
            _ => {}
        }
    }
    false
}

fn is_block_header(logical: &str) -> bool {
    let mut words = logical
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty());

    match words.next() {
        Some("async") => matches!(words.next(), Some("def" | "for" | "with")),
        Some(word) => PYTHON_BLOCK_KEYWORDS.contains(&word),
        None => false,
    }
}
