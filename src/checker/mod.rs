//! Language checkers.
//!
//! A checker answers "is this snippet syntactically valid, and does it
//! trip any lint rules". Each language is served by one registered
//! [`LanguageChecker`]; the registry is built once at startup and shared.

pub mod command;
pub mod lints;
pub mod python;
pub mod syntax;

pub use command::CommandChecker;
pub use python::PythonChecker;
pub use syntax::TreeSitterChecker;

use crate::config::{CheckerBackendKind, Config};
use crate::models::{sort_findings, CheckerFinding, Language};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Ways a checker run can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("checker unavailable: {0}")]
    CheckerUnavailable(String),

    #[error("checker timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

/// A syntax/lint backend for one language.
#[async_trait]
pub trait LanguageChecker: Send + Sync {
    /// Short backend name for logs (e.g. "tree-sitter", "python3").
    fn name(&self) -> &str;

    /// Check a snippet. An empty vector means no problems were found.
    async fn check(&self, code: &str) -> Result<Vec<CheckerFinding>, CheckError>;
}

/// Maps each supported language to its checker.
#[derive(Default, Clone)]
pub struct CheckerRegistry {
    checkers: HashMap<Language, Arc<dyn LanguageChecker>>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the checker for a language.
    pub fn register(&mut self, language: Language, checker: Arc<dyn LanguageChecker>) {
        self.checkers.insert(language, checker);
    }

    /// Build the registry for every language enabled in the configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();

        for language in config.languages()? {
            let backend = config
                .checker
                .backends
                .get(language.as_str())
                .cloned()
                .unwrap_or_default();

            let checker: Arc<dyn LanguageChecker> = match backend.backend {
                CheckerBackendKind::Auto if language == Language::Python => {
                    Arc::new(PythonChecker::new(config.checker.max_warnings)?)
                }
                CheckerBackendKind::Auto | CheckerBackendKind::TreeSitter => Arc::new(
                    TreeSitterChecker::new(language, config.checker.max_warnings),
                ),
                CheckerBackendKind::Command if backend.command.is_empty() => {
                    Arc::new(CommandChecker::builtin(language)?)
                }
                CheckerBackendKind::Command => {
                    Arc::new(CommandChecker::new(language, backend.command.clone())?)
                }
            };

            debug!("Registered {} checker for {}", checker.name(), language);
            registry.register(language, checker);
        }

        Ok(registry)
    }

    pub fn supports(&self, language: Language) -> bool {
        self.checkers.contains_key(&language)
    }

    /// Registered languages in a stable order.
    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.checkers.keys().copied().collect();
        languages.sort();
        languages
    }

    /// Run the language's checker and return its findings ordered by position.
    pub async fn check(
        &self,
        code: &str,
        language: Language,
    ) -> Result<Vec<CheckerFinding>, CheckError> {
        let checker = self
            .checkers
            .get(&language)
            .ok_or_else(|| CheckError::UnsupportedLanguage(language.to_string()))?;

        let mut findings = checker.check(code).await?;
        sort_findings(&mut findings);
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Location;

    struct ReversedChecker;

    #[async_trait]
    impl LanguageChecker for ReversedChecker {
        fn name(&self) -> &str {
            "reversed"
        }

        async fn check(&self, _code: &str) -> Result<Vec<CheckerFinding>, CheckError> {
            Ok(vec![
                CheckerFinding::warning("late", Some(Location { line: 9, column: 1 })),
                CheckerFinding::error("early", Some(Location { line: 1, column: 1 })),
            ])
        }
    }

    #[tokio::test]
    async fn test_registry_sorts_findings() {
        let mut registry = CheckerRegistry::new();
        registry.register(Language::Python, Arc::new(ReversedChecker));

        let findings = registry.check("x", Language::Python).await.unwrap();
        assert_eq!(findings[0].message, "early");
        assert_eq!(findings[1].message, "late");
    }

    #[tokio::test]
    async fn test_registry_rejects_unregistered_language() {
        let registry = CheckerRegistry::new();
        let err = registry.check("x", Language::Cpp).await.unwrap_err();
        assert_eq!(err, CheckError::UnsupportedLanguage("cpp".to_string()));
    }

    #[test]
    fn test_from_config_registers_enabled_languages() {
        let mut config = Config::default();
        config.service.languages = vec!["python".to_string(), "cpp".to_string()];

        let registry = CheckerRegistry::from_config(&config).unwrap();
        assert!(registry.supports(Language::Python));
        assert!(registry.supports(Language::Cpp));
        assert!(!registry.supports(Language::JavaScript));
        assert_eq!(registry.languages(), vec![Language::Python, Language::Cpp]);
        assert_eq!(
            registry.checkers[&Language::Python].name(),
            "python3+tree-sitter"
        );
        assert_eq!(registry.checkers[&Language::Cpp].name(), "tree-sitter");
    }

    #[test]
    fn test_from_config_honors_tree_sitter_override() {
        let mut config = Config::default();
        config.checker.backends.insert(
            "python".to_string(),
            crate::config::CheckerBackendConfig {
                backend: CheckerBackendKind::TreeSitter,
                command: Vec::new(),
            },
        );

        let registry = CheckerRegistry::from_config(&config).unwrap();
        assert_eq!(registry.checkers[&Language::Python].name(), "tree-sitter");
    }

    #[test]
    fn test_from_config_rejects_command_without_builtin() {
        let mut config = Config::default();
        config.checker.backends.insert(
            "javascript".to_string(),
            crate::config::CheckerBackendConfig {
                backend: CheckerBackendKind::Command,
                command: Vec::new(),
            },
        );
        assert!(CheckerRegistry::from_config(&config).is_err());
    }
}
