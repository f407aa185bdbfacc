//! Subprocess-backed checker.
//!
//! Runs an external program with the snippet on stdin and reads one JSON
//! finding per stdout line:
//!
//! ```text
//! {"line": 1, "column": 18, "message": "expected ':'", "severity": "error"}
//! ```
//!
//! `line`, `column` and `severity` are optional; severity defaults to error.

use super::{CheckError, LanguageChecker};
use crate::models::{CheckerFinding, Language, Location, Severity};
use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Parses stdin with the interpreter's own grammar and prints the first
/// syntax error in the line format above.
const PYTHON_AST_SCRIPT: &str = r#"
import ast, json, sys
source = sys.stdin.buffer.read().decode("utf-8", "replace")
try:
    ast.parse(source)
except SyntaxError as exc:
    print(json.dumps({"line": exc.lineno, "column": exc.offset, "message": exc.msg, "severity": "error"}))
except ValueError as exc:
    print(json.dumps({"message": str(exc), "severity": "error"}))
"#;

#[derive(Debug, Deserialize)]
struct CommandFinding {
    message: String,
    #[serde(default)]
    line: Option<usize>,
    #[serde(default)]
    column: Option<usize>,
    #[serde(default = "default_severity")]
    severity: Severity,
}

fn default_severity() -> Severity {
    Severity::Error
}

/// Checker that shells out to a language tool.
#[derive(Debug, Clone)]
pub struct CommandChecker {
    language: Language,
    program: String,
    args: Vec<String>,
}

impl CommandChecker {
    /// `command` is the program followed by its arguments.
    pub fn new(language: Language, command: Vec<String>) -> Result<Self, CheckError> {
        let mut parts = command.into_iter();
        let program = parts.next().filter(|p| !p.trim().is_empty()).ok_or_else(|| {
            CheckError::CheckerUnavailable(format!("empty checker command for {}", language))
        })?;

        Ok(Self {
            language,
            program,
            args: parts.collect(),
        })
    }

    /// The built-in command for a language, where one exists.
    pub fn builtin(language: Language) -> Result<Self, CheckError> {
        match language {
            Language::Python => Self::new(
                language,
                vec![
                    "python3".to_string(),
                    "-c".to_string(),
                    PYTHON_AST_SCRIPT.to_string(),
                ],
            ),
            other => Err(CheckError::CheckerUnavailable(format!(
                "no built-in checker command for {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl LanguageChecker for CommandChecker {
    fn name(&self) -> &str {
        &self.program
    }

    async fn check(&self, code: &str) -> Result<Vec<CheckerFinding>, CheckError> {
        debug!("Running {} checker: {}", self.language, self.program);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CheckError::CheckerUnavailable(format!("'{}' not found", self.program))
                } else {
                    CheckError::CheckerUnavailable(format!(
                        "failed to start '{}': {}",
                        self.program, e
                    ))
                }
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A tool that exits without reading stdin closes the pipe early;
            // its exit status decides the outcome.
            if let Err(e) = stdin.write_all(code.as_bytes()).await {
                debug!("Checker stdin closed early: {}", e);
            }
        }

        let output = child.wait_with_output().await.map_err(|e| {
            CheckError::CheckerUnavailable(format!("'{}' did not complete: {}", self.program, e))
        })?;

        let findings = parse_findings(&String::from_utf8_lossy(&output.stdout));

        if !output.status.success() && findings.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().last().unwrap_or("").trim();
            warn!("{} checker exited with {}", self.language, output.status);
            return Err(CheckError::CheckerUnavailable(format!(
                "'{}' exited with {}{}{}",
                self.program,
                output.status,
                if reason.is_empty() { "" } else { ": " },
                reason
            )));
        }

        Ok(findings)
    }
}

/// True when a `python3` interpreter can be started.
#[cfg(test)]
pub(crate) fn python3_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Parse JSON-lines output, skipping anything that is not a finding.
fn parse_findings(stdout: &str) -> Vec<CheckerFinding> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| serde_json::from_str::<CommandFinding>(line).ok())
        .map(|f| CheckerFinding {
            message: f.message,
            location: f.line.map(|line| Location {
                line,
                column: f.column.unwrap_or(1),
            }),
            severity: f.severity,
        })
        .collect()
}
