//! Default Python checker.
//!
//! CPython's own parser decides syntax errors, since the tree-sitter
//! grammar accepts Python 2 statements and ignores indentation. The
//! grammar still supplies the lint warnings, and stands in for the
//! interpreter when `python3` cannot be run.

use super::{CheckError, CommandChecker, LanguageChecker, TreeSitterChecker};
use crate::models::{CheckerFinding, Language, Severity};
use async_trait::async_trait;
use tracing::warn;

pub struct PythonChecker {
    interpreter: CommandChecker,
    grammar: TreeSitterChecker,
}

impl PythonChecker {
    /// Interpreter `ast` parse for errors, tree-sitter for warnings.
    pub fn new(max_warnings: usize) -> Result<Self, CheckError> {
        Ok(Self::with_interpreter(
            CommandChecker::builtin(Language::Python)?,
            max_warnings,
        ))
    }

    pub fn with_interpreter(interpreter: CommandChecker, max_warnings: usize) -> Self {
        Self {
            interpreter,
            grammar: TreeSitterChecker::new(Language::Python, max_warnings),
        }
    }
}

#[async_trait]
impl LanguageChecker for PythonChecker {
    fn name(&self) -> &str {
        "python3+tree-sitter"
    }

    async fn check(&self, code: &str) -> Result<Vec<CheckerFinding>, CheckError> {
        let (interpreted, parsed) =
            tokio::join!(self.interpreter.check(code), self.grammar.check(code));
        let parsed = parsed?;

        match interpreted {
            Ok(mut findings) => {
                findings.extend(
                    parsed
                        .into_iter()
                        .filter(|f| f.severity == Severity::Warning),
                );
                Ok(findings)
            }
            Err(e) => {
                warn!("Falling back to the tree-sitter grammar: {}", e);
                Ok(parsed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::command::python3_available;

    fn errors(findings: &[CheckerFinding]) -> Vec<&CheckerFinding> {
        findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .collect()
    }

    #[tokio::test]
    async fn test_interpreter_catches_what_the_grammar_accepts() {
        if !python3_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let checker = PythonChecker::new(20).unwrap();

        for (code, line) in [
            ("print \"hello\"\n", 1),
            ("def f(x):\nreturn x\n", 2),
            ("x = 1\n  y = 2\n", 2),
        ] {
            let findings = checker.check(code).await.unwrap();
            let errors = errors(&findings);
            assert_eq!(errors.len(), 1, "{:?}", code);
            assert_eq!(errors[0].location.map(|l| l.line), Some(line), "{:?}", code);
        }
    }

    #[tokio::test]
    async fn test_warnings_come_from_the_grammar() {
        if !python3_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        let checker = PythonChecker::new(20).unwrap();

        let findings = checker
            .check("try:\n    run()\nexcept:\n    pass\n")
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].location.map(|l| l.line), Some(3));

        assert!(checker.check("for i in range(5): print(i)").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_interpreter_falls_back_to_grammar() {
        let interpreter = CommandChecker::new(
            Language::Python,
            vec!["codemedic-no-such-python".to_string()],
        )
        .unwrap();
        let checker = PythonChecker::with_interpreter(interpreter, 20);

        let findings = checker.check("for i in range(5) print(i)").await.unwrap();
        let errors = errors(&findings);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "expected ':'");
    }
}
