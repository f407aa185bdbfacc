//! Request validation and concurrent dispatch to the checker and synthesizer.
//!
//! One [`Orchestrator`] is built at startup and shared by every
//! connection. Each call to [`Orchestrator::analyze`] validates the raw
//! request, runs the checker and the synthesizer as two tokio tasks over
//! the same immutable request snapshot, and aggregates whatever they
//! settle with. Nothing escapes as an error or a panic; every outcome is
//! an [`Analysis`] carrying a response body and a status.

use super::aggregator::{aggregate, CheckOutcome};
use crate::checker::{CheckError, CheckerRegistry};
use crate::config::Config;
use crate::models::{AnalysisRequest, AnalysisResult, CheckerFinding, Language, RawAnalysisRequest};
use crate::synth::Synthesizer;
use anyhow::{bail, Result};
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Message used for any unexpected failure inside the pipeline.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal error while analyzing code";

/// Lifecycle of a single analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validating,
    Dispatching,
    Awaiting,
    Aggregating,
    Responded,
    Rejected,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Validating => "validating",
            Stage::Dispatching => "dispatching",
            Stage::Awaiting => "awaiting",
            Stage::Aggregating => "aggregating",
            Stage::Responded => "responded",
            Stage::Rejected => "rejected",
        };
        write!(f, "{}", name)
    }
}

/// Request problems detected before any dependency is called.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("{0}")]
    MalformedRequest(String),
}

/// Failures that stop an analysis before aggregation.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// How an analysis ended. Drives the transport status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    /// A report was produced, possibly degraded.
    Completed,
    /// The request never reached the dependencies.
    Rejected,
    /// Both dependencies failed.
    Inoperable,
    /// Something unexpected went wrong.
    Internal,
}

/// Response body plus the way it came about.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub result: AnalysisResult,
    pub status: AnalysisStatus,
    /// Stages visited, in order.
    pub stages: Vec<Stage>,
}

impl Analysis {
    /// Stages visited, joined for logging.
    pub fn path(&self) -> String {
        self.stages
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// An analysis that stopped at validation.
    pub fn rejected(error: ValidationError) -> Self {
        Self {
            result: AnalysisResult::failure(error.to_string()),
            status: AnalysisStatus::Rejected,
            stages: vec![Stage::Received, Stage::Validating, Stage::Rejected],
        }
    }
}

/// Records and logs stage transitions for one run.
struct StageLog {
    stages: Vec<Stage>,
}

impl StageLog {
    fn start() -> Self {
        debug!("Analysis stage: {}", Stage::Received);
        Self {
            stages: vec![Stage::Received],
        }
    }

    fn enter(&mut self, stage: Stage) {
        if let Some(previous) = self.stages.last() {
            debug!("Analysis stage: {} -> {}", previous, stage);
        }
        self.stages.push(stage);
    }
}

/// Shared analysis service.
pub struct Orchestrator {
    registry: Arc<CheckerRegistry>,
    synthesizer: Synthesizer,
    checker_timeout: Duration,
    default_language: Language,
    samples: HashMap<Language, String>,
    share_findings: bool,
}

impl Orchestrator {
    /// Build an orchestrator over an already-populated registry.
    ///
    /// The default language is the first registered one (python when
    /// registered), with the built-in sample snippets.
    pub fn new(registry: CheckerRegistry, synthesizer: Synthesizer) -> Self {
        let languages = registry.languages();
        let default_language = if languages.contains(&Language::Python) || languages.is_empty() {
            Language::Python
        } else {
            languages[0]
        };

        Self {
            registry: Arc::new(registry),
            synthesizer,
            checker_timeout: Duration::from_secs(5),
            default_language,
            samples: HashMap::new(),
            share_findings: true,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = CheckerRegistry::from_config(config)?;
        let synthesizer = Synthesizer::from_config(&config.synthesizer)?;

        let default_language = config.default_language()?;
        if !registry.supports(default_language) {
            bail!(
                "Default language '{}' has no registered checker",
                default_language
            );
        }

        let mut orchestrator = Self::new(registry, synthesizer)
            .with_checker_timeout(Duration::from_secs(config.checker.timeout_seconds))
            .with_default_language(default_language)
            .with_share_findings(config.service.share_findings);

        for (name, snippet) in &config.service.samples {
            let language: Language = name
                .parse()
                .map_err(|_| anyhow::anyhow!("Unknown language key in service.samples: {}", name))?;
            orchestrator = orchestrator.with_sample(language, snippet.clone());
        }

        Ok(orchestrator)
    }

    pub fn with_checker_timeout(mut self, timeout: Duration) -> Self {
        self.checker_timeout = timeout;
        self
    }

    pub fn with_default_language(mut self, language: Language) -> Self {
        self.default_language = language;
        self
    }

    pub fn with_share_findings(mut self, share: bool) -> Self {
        self.share_findings = share;
        self
    }

    /// Override the snippet analyzed when a request for `language` has no code.
    pub fn with_sample(mut self, language: Language, snippet: impl Into<String>) -> Self {
        self.samples.insert(language, snippet.into());
        self
    }

    /// Languages this instance accepts, in a stable order.
    pub fn languages(&self) -> Vec<Language> {
        self.registry.languages()
    }

    pub fn default_language(&self) -> Language {
        self.default_language
    }

    fn sample_for(&self, language: Language) -> String {
        self.samples
            .get(&language)
            .cloned()
            .unwrap_or_else(|| language.sample_snippet().to_string())
    }

    /// Normalize a raw request or reject it.
    pub fn validate(&self, raw: RawAnalysisRequest) -> Result<AnalysisRequest, ValidationError> {
        let requested = raw
            .language
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());

        let language = match requested {
            None => self.default_language,
            Some(name) => match name.parse::<Language>() {
                Ok(language) if self.registry.supports(language) => language,
                _ => return Err(ValidationError::UnsupportedLanguage(name.to_string())),
            },
        };

        let code = match raw.code {
            Some(code) if !code.trim().is_empty() => code,
            _ => {
                debug!("Empty code, analyzing the {} sample snippet", language);
                self.sample_for(language)
            }
        };

        Ok(AnalysisRequest { code, language })
    }

    /// Run one analysis. Always produces a response.
    pub async fn analyze(&self, raw: RawAnalysisRequest) -> Analysis {
        let started = Instant::now();
        let mut log = StageLog::start();

        let outcome = AssertUnwindSafe(self.run(raw, &mut log)).catch_unwind().await;

        let (result, status) = match outcome {
            Ok(Ok(result)) if result.is_failure() => {
                warn!("Analysis inoperable: both checker and synthesizer failed");
                (result, AnalysisStatus::Inoperable)
            }
            Ok(Ok(result)) => (result, AnalysisStatus::Completed),
            Ok(Err(AnalysisError::Validation(e))) => {
                info!("Rejected analysis request: {}", e);
                log.enter(Stage::Rejected);
                return Analysis {
                    result: AnalysisResult::failure(e.to_string()),
                    status: AnalysisStatus::Rejected,
                    stages: log.stages,
                };
            }
            Ok(Err(e)) => {
                error!("Analysis failed: {}", e);
                (
                    AnalysisResult::failure(INTERNAL_ERROR_MESSAGE),
                    AnalysisStatus::Internal,
                )
            }
            Err(_) => {
                error!("Analysis panicked");
                (
                    AnalysisResult::failure(INTERNAL_ERROR_MESSAGE),
                    AnalysisStatus::Internal,
                )
            }
        };

        log.enter(Stage::Responded);
        info!(
            "Analysis finished in {:.2}s ({:?})",
            started.elapsed().as_secs_f64(),
            status
        );

        Analysis {
            result,
            status,
            stages: log.stages,
        }
    }

    /// Run one analysis and also deliver the result on `notify`.
    ///
    /// A receiver that has gone away is not an error.
    pub async fn analyze_and_notify(
        &self,
        raw: RawAnalysisRequest,
        notify: mpsc::Sender<AnalysisResult>,
    ) -> Analysis {
        let analysis = self.analyze(raw).await;
        if notify.send(analysis.result.clone()).await.is_err() {
            debug!("Push receiver closed before the result was delivered");
        }
        analysis
    }

    async fn run(
        &self,
        raw: RawAnalysisRequest,
        log: &mut StageLog,
    ) -> Result<AnalysisResult, AnalysisError> {
        log.enter(Stage::Validating);
        let request = Arc::new(self.validate(raw)?);
        info!(
            "Analyzing {} snippet ({} chars)",
            request.language,
            request.code.chars().count()
        );

        log.enter(Stage::Dispatching);
        let (findings_tx, findings_rx) = watch::channel(None::<Arc<Vec<CheckerFinding>>>);

        let checker_task = {
            let registry = Arc::clone(&self.registry);
            let request = Arc::clone(&request);
            let timeout = self.checker_timeout;
            tokio::spawn(async move {
                let outcome: CheckOutcome =
                    match tokio::time::timeout(timeout, registry.check(&request.code, request.language))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => Err(CheckError::Timeout(timeout)),
                    };

                match &outcome {
                    Ok(findings) => {
                        debug!("Checker reported {} findings", findings.len());
                        let _ = findings_tx.send(Some(Arc::new(findings.clone())));
                    }
                    Err(e) => warn!("Checker degraded: {}", e),
                }
                outcome
            })
        };

        let synth_task = {
            let synthesizer = self.synthesizer.clone();
            let request = Arc::clone(&request);
            let share = self.share_findings;
            tokio::spawn(async move {
                let findings = if share {
                    shared_findings(findings_rx).await
                } else {
                    Arc::default()
                };
                synthesizer
                    .synthesize(&request.code, request.language, &findings)
                    .await
            })
        };

        log.enter(Stage::Awaiting);
        let (checked, synthesis) = tokio::join!(checker_task, synth_task);
        let checked = checked.unwrap_or_else(|e| {
            warn!("Checker degraded: checker task failed: {}", e);
            Err(CheckError::CheckerUnavailable(format!("checker task failed: {}", e)))
        });
        let synthesis =
            synthesis.map_err(|e| AnalysisError::Internal(format!("synthesizer task: {}", e)))?;

        log.enter(Stage::Aggregating);
        Ok(aggregate(&checked, &synthesis))
    }
}

/// Wait for the checker's findings. A checker that fails, times out or
/// panics drops its sender, which yields no findings.
async fn shared_findings(
    mut rx: watch::Receiver<Option<Arc<Vec<CheckerFinding>>>>,
) -> Arc<Vec<CheckerFinding>> {
    loop {
        let current = rx.borrow_and_update().clone();
        if let Some(findings) = current {
            return findings;
        }
        if rx.changed().await.is_err() {
            return Arc::default();
        }
    }
}
