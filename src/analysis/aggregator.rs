//! Merging checker and synthesizer output into the response contract.
//!
//! Aggregation is a pure function of its inputs, so the same findings
//! and synthesis always produce the same [`AnalysisResult`].

use crate::checker::CheckError;
use crate::models::{AnalysisResult, CheckerFinding, Severity};
use crate::synth::Synthesis;
use tracing::debug;

/// Settled checker result as seen by the aggregator.
pub type CheckOutcome = Result<Vec<CheckerFinding>, CheckError>;

/// Message returned when neither dependency produced anything.
fn inoperable_message(check_error: &CheckError, synthesis: &Synthesis) -> String {
    let synth_reason = synthesis
        .failure
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "no output".to_string());
    format!(
        "Analysis unavailable: {}; {}",
        check_error, synth_reason
    )
}

/// True when `candidate` repeats any entry, ignoring case and with
/// containment in either direction counting as a repeat.
fn is_near_duplicate(candidate: &str, existing: &[String]) -> bool {
    let candidate = candidate.trim().to_lowercase();
    if candidate.is_empty() {
        return true;
    }
    existing.iter().any(|entry| {
        let entry = entry.trim().to_lowercase();
        !entry.is_empty() && (entry.contains(&candidate) || candidate.contains(&entry))
    })
}

fn push_unique(target: &mut Vec<String>, against: &[String], item: String) {
    if !is_near_duplicate(&item, target) && !is_near_duplicate(&item, against) {
        target.push(item);
    }
}

/// Combine both dependency results into one response.
pub fn aggregate(checked: &CheckOutcome, synthesis: &Synthesis) -> AnalysisResult {
    let (findings, check_failed) = match checked {
        Ok(findings) => (findings.as_slice(), false),
        Err(_) => (&[][..], true),
    };

    if let Err(check_error) = checked {
        if synthesis.is_failed() {
            return AnalysisResult::failure(inoperable_message(check_error, synthesis));
        }
    }

    let mut errors: Vec<String> = Vec::new();
    for finding in findings.iter().filter(|f| f.severity == Severity::Error) {
        let rendered = finding.to_string();
        if !errors.contains(&rendered) {
            errors.push(rendered);
        }
    }

    let mut suggestions: Vec<String> = Vec::new();
    for finding in findings.iter().filter(|f| f.severity == Severity::Warning) {
        push_unique(&mut suggestions, &errors, format!("warning: {}", finding));
    }

    for raw in &synthesis.output.raw_suggestions {
        push_unique(&mut suggestions, &errors, raw.trim().to_string());
    }

    debug!(
        "Aggregated {} errors and {} suggestions",
        errors.len(),
        suggestions.len()
    );

    AnalysisResult {
        errors: (!check_failed).then_some(errors),
        suggestions: Some(suggestions),
        ai_analysis: synthesis.output.narrative.clone(),
        corrected_code: synthesis.output.corrected_code.clone(),
        error: None,
    }
}
