//! Prompt construction for the reasoning backend.

use crate::models::{CheckerFinding, Language};

/// System and user messages for one analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Whether the code was cut to fit the size cap.
    pub truncated: bool,
}

/// Build the prompt, capping the embedded code at `max_code_chars` characters.
pub fn build_prompt(
    code: &str,
    language: Language,
    findings: &[CheckerFinding],
    max_code_chars: usize,
) -> Prompt {
    let (code, truncated) = truncate_code(code, max_code_chars);

    let system = format!(
        "You are a {} code debugging assistant. Provide:\n\
         1. Specific errors found\n\
         2. Clear suggestions\n\
         3. Corrected code (if needed)\n\
         4. Explanation of changes\n\n\
         Use these Markdown headings: '## Errors', '## Suggestions', '## Corrected Code', \
         '## Explanation'. Under '## Suggestions' write one suggestion per bullet point. \
         Under '## Corrected Code' give the complete fixed program in a single fenced code \
         block, or write 'None' if no change is needed.",
        language.display_name()
    );

    let mut user = format!(
        "Analyze this {} code:\n```{}\n{}\n```\n",
        language.display_name(),
        language.as_str(),
        code
    );

    if !findings.is_empty() {
        user.push_str("\nA syntax checker already reported:\n");
        for finding in findings {
            user.push_str(&format!("- {} ({})\n", finding, finding.severity));
        }
        user.push_str(
            "\nExplain and fix these first, then look for deeper semantic and style problems.\n",
        );
    }

    Prompt {
        system,
        user,
        truncated,
    }
}

/// Cut `code` to `max_chars` characters and append a visible marker.
pub fn truncate_code(code: &str, max_chars: usize) -> (String, bool) {
    let total = code.chars().count();
    if total <= max_chars {
        return (code.to_string(), false);
    }

    let kept: String = code.chars().take(max_chars).collect();
    let marker = format!(
        "\n... [truncated: {} more characters not shown]",
        total - max_chars
    );
    (kept + &marker, true)
}
