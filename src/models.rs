//! Data models for the analysis service.
//!
//! This module contains the request, finding, and response structures
//! shared by the checkers, the synthesizer, and the HTTP front end.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A language the service knows how to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Cpp,
}

impl Language {
    /// Every language with a built-in checker.
    pub const ALL: [Language; 3] = [Language::Python, Language::JavaScript, Language::Cpp];

    /// Canonical wire name, as accepted in requests and config keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Cpp => "cpp",
        }
    }

    /// Human-readable name used in prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::JavaScript => "JavaScript",
            Language::Cpp => "C++",
        }
    }

    /// Built-in snippet analyzed when a request arrives without code.
    pub fn sample_snippet(&self) -> &'static str {
        match self {
            Language::Python => "for i in range(5): print(i)",
            Language::JavaScript => "for (let i = 0; i < 5; i++) { console.log(i); }",
            Language::Cpp => {
                "#include <iostream>\n\nint main() {\n    for (int i = 0; i < 5; i++) {\n        std::cout << i << std::endl;\n    }\n    return 0;\n}\n"
            }
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" => Ok(Language::JavaScript),
            "cpp" | "c++" => Ok(Language::Cpp),
            other => Err(other.to_string()),
        }
    }
}

/// Request body as it arrives on the wire. Both fields may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawAnalysisRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[cfg(test)]
impl RawAnalysisRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            language: Some(language.into()),
        }
    }
}

/// A validated request: non-empty code and a registered language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub code: String,
    pub language: Language,
}

/// Severity of a checker finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// 1-indexed source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

/// A single problem reported by a language checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerFinding {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub severity: Severity,
}

impl CheckerFinding {
    pub fn error(message: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            message: message.into(),
            location,
            severity: Severity::Error,
        }
    }

    pub fn warning(message: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            message: message.into(),
            location,
            severity: Severity::Warning,
        }
    }

    /// Sort key: position ascending, unlocated findings last.
    pub fn position_key(&self) -> (usize, usize) {
        self.location
            .map(|l| (l.line, l.column))
            .unwrap_or((usize::MAX, usize::MAX))
    }
}

impl fmt::Display for CheckerFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(f, "line {}, column {}: {}", loc.line, loc.column, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Sort findings by position; `sort_by_key` is stable so ties keep discovery order.
pub fn sort_findings(findings: &mut [CheckerFinding]) {
    findings.sort_by_key(CheckerFinding::position_key);
}

/// What the reasoning backend contributed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizerOutput {
    pub narrative: Option<String>,
    pub corrected_code: Option<String>,
    pub raw_suggestions: Vec<String>,
}

impl SynthesizerOutput {
    pub fn is_empty(&self) -> bool {
        self.narrative.is_none() && self.corrected_code.is_none() && self.raw_suggestions.is_empty()
    }
}

/// The response contract returned to clients.
///
/// Either `error` is set alone, or any combination of the other fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    /// A result carrying only a top-level failure message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
