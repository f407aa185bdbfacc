//! Suggestion synthesis through a generative reasoning backend.
//!
//! The synthesizer never fails an analysis: every backend problem is
//! recorded on the returned [`Synthesis`] next to an empty output.

pub mod backend;
pub mod prompt;
pub mod response;

pub use backend::ReasoningBackend;

use crate::config::SynthesizerConfig;
use crate::models::{CheckerFinding, Language, SynthesizerOutput};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Ways a backend call can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("reasoning backend timed out after {}s", .0.as_secs_f64())]
    BackendTimeout(Duration),

    #[error("reasoning backend error: {0}")]
    BackendError(String),

    #[error("reasoning backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Output of one synthesis attempt, plus the failure that emptied it, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Synthesis {
    pub output: SynthesizerOutput,
    pub failure: Option<SynthesisError>,
}

impl Synthesis {
    pub fn completed(output: SynthesizerOutput) -> Self {
        Self {
            output,
            failure: None,
        }
    }

    pub fn failed(error: SynthesisError) -> Self {
        Self {
            output: SynthesizerOutput::default(),
            failure: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Builds prompts, calls the backend under a deadline, and parses the reply.
#[derive(Clone)]
pub struct Synthesizer {
    backend: Arc<dyn ReasoningBackend>,
    timeout: Duration,
    max_code_chars: usize,
}

impl Synthesizer {
    pub fn new(backend: Arc<dyn ReasoningBackend>, timeout: Duration, max_code_chars: usize) -> Self {
        Self {
            backend,
            timeout,
            max_code_chars,
        }
    }

    pub fn from_config(config: &SynthesizerConfig) -> Result<Self> {
        Ok(Self::new(
            backend::from_config(config)?,
            Duration::from_secs(config.timeout_seconds),
            config.max_code_chars,
        ))
    }

    /// Ask the backend about `code`. Never returns an error; see [`Synthesis`].
    pub async fn synthesize(
        &self,
        code: &str,
        language: Language,
        findings: &[CheckerFinding],
    ) -> Synthesis {
        match self.try_synthesize(code, language, findings).await {
            Ok(output) => Synthesis::completed(output),
            Err(e) => {
                warn!("Synthesis degraded: {}", e);
                Synthesis::failed(e)
            }
        }
    }

    async fn try_synthesize(
        &self,
        code: &str,
        language: Language,
        findings: &[CheckerFinding],
    ) -> Result<SynthesizerOutput, SynthesisError> {
        let prompt = prompt::build_prompt(code, language, findings, self.max_code_chars);
        if prompt.truncated {
            debug!("Code truncated to {} characters for the prompt", self.max_code_chars);
        }
        debug!(
            "Calling {} backend with {} findings as context",
            self.backend.name(),
            findings.len()
        );

        let reply = tokio::time::timeout(
            self.timeout,
            self.backend.complete(&prompt.system, &prompt.user),
        )
        .await
        .map_err(|_| SynthesisError::BackendTimeout(self.timeout))??;

        let output = response::parse_response(&reply);
        if output.is_empty() {
            return Err(SynthesisError::BackendError("empty response".to_string()));
        }
        Ok(output)
    }
}
