//! Extraction of structured pieces from the backend's free text.
//!
//! The narrative is kept verbatim. Bullet items under a suggestions-like
//! heading become raw suggestions; the first fenced block under a
//! corrected-code heading becomes the corrected code.

use crate::models::SynthesizerOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Other,
    Suggestions,
    CorrectedCode,
}

fn classify_heading(heading: &str) -> Section {
    let lower = heading.to_lowercase();
    if lower.contains("suggest") || lower.contains("improve") || lower.contains("recommend") {
        Section::Suggestions
    } else if lower.contains("correct") || lower.contains("fixed") {
        Section::CorrectedCode
    } else {
        Section::Other
    }
}

/// Heading text if the line is a Markdown heading or a bold-only line.
fn heading_text(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.starts_with('#') {
        return Some(trimmed.trim_start_matches('#').trim());
    }
    if trimmed.len() > 4 && trimmed.starts_with("**") && trimmed.ends_with("**") {
        return Some(trimmed.trim_matches('*').trim().trim_end_matches(':'));
    }
    None
}

/// Item text if the line starts a bullet or numbered list item.
fn list_item(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    for marker in ["- ", "* ", "+ "] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return Some(rest.trim());
        }
    }

    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &trimmed[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim());
        }
    }
    None
}

/// Parse a backend reply into the synthesizer's output shape.
pub fn parse_response(text: &str) -> SynthesizerOutput {
    if text.trim().is_empty() {
        return SynthesizerOutput::default();
    }

    let mut section = Section::Other;
    let mut in_fence = false;
    let mut fence_lines: Vec<&str> = Vec::new();
    let mut corrected_code: Option<String> = None;
    let mut suggestions: Vec<String> = Vec::new();
    let mut continuing = false;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            if in_fence {
                in_fence = false;
                if section == Section::CorrectedCode && corrected_code.is_none() {
                    corrected_code = Some(fence_lines.join("\n"));
                }
                fence_lines.clear();
            } else {
                in_fence = true;
                continuing = false;
            }
            continue;
        }

        if in_fence {
            fence_lines.push(line);
            continue;
        }

        if let Some(heading) = heading_text(line) {
            section = classify_heading(heading);
            continuing = false;
            continue;
        }

        if section != Section::Suggestions {
            continue;
        }

        if let Some(item) = list_item(line) {
            let item = item.trim_matches('*').trim();
            if item.is_empty() {
                continuing = false;
            } else {
                suggestions.push(item.to_string());
                continuing = true;
            }
        } else if line.trim().is_empty() {
            continuing = false;
        } else if continuing && line.starts_with(char::is_whitespace) {
            if let Some(last) = suggestions.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
            }
        }
    }

    SynthesizerOutput {
        narrative: Some(text.to_string()),
        corrected_code: corrected_code.filter(|code| !code.trim().is_empty()),
        raw_suggestions: suggestions,
    }
}
