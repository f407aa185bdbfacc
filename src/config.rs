//! Configuration file handling.
//!
//! This module handles loading `.codemedic.toml`, merging startup
//! arguments over it, and validating the result.

use crate::models::Language;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".codemedic.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Request handling policy.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Language checker settings.
    #[serde(default)]
    pub checker: CheckerConfig,

    /// Reasoning backend settings.
    #[serde(default)]
    pub synthesizer: SynthesizerConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Origins allowed by CORS.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Largest accepted request body in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5001".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000", "http://127.0.0.1:3000"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024 // 1MB
}

/// Request handling policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Languages accepted by the service.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Language assumed when a request omits it.
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Per-language snippet analyzed when a request carries no code.
    /// Languages without an entry use the built-in sample.
    #[serde(default)]
    pub samples: BTreeMap<String, String>,

    /// Let the synthesizer wait for checker findings to use as prompt context.
    #[serde(default = "default_true")]
    pub share_findings: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            languages: default_languages(),
            default_language: default_language(),
            samples: BTreeMap::new(),
            share_findings: true,
        }
    }
}

fn default_languages() -> Vec<String> {
    Language::ALL.iter().map(|l| l.as_str().to_string()).collect()
}

fn default_language() -> String {
    "python".to_string()
}

fn default_true() -> bool {
    true
}

/// Which checker implementation serves a language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckerBackendKind {
    /// The language's preferred checker. For Python that is the interpreter's
    /// own parser with the tree-sitter grammar as fallback; tree-sitter elsewhere.
    #[default]
    Auto,
    /// In-process tree-sitter grammar.
    TreeSitter,
    /// External program reading code on stdin.
    Command,
}

/// Per-language checker override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckerBackendConfig {
    #[serde(default)]
    pub backend: CheckerBackendKind,

    /// Program and arguments for the `command` backend.
    /// Empty means the built-in command for the language, if any.
    #[serde(default)]
    pub command: Vec<String>,
}

/// Language checker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Deadline for one checker run.
    #[serde(default = "default_checker_timeout")]
    pub timeout_seconds: u64,

    /// Cap on lint warnings per run.
    #[serde(default = "default_max_warnings")]
    pub max_warnings: usize,

    /// Backend overrides keyed by language name.
    #[serde(default)]
    pub backends: BTreeMap<String, CheckerBackendConfig>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_checker_timeout(),
            max_warnings: default_max_warnings(),
            backends: BTreeMap::new(),
        }
    }
}

fn default_checker_timeout() -> u64 {
    5
}

fn default_max_warnings() -> usize {
    20
}

/// Reasoning backend protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions.
    #[default]
    Openai,
    /// Ollama `/api/chat`.
    Ollama,
}

impl ProviderKind {
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "https://api.openai.com/v1",
            ProviderKind::Ollama => "http://localhost:11434",
        }
    }
}

/// Reasoning backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    /// Set to false to run checker-only analyses.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub provider: ProviderKind,

    /// Base URL; the provider's public endpoint when unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer credential. Required by the openai provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Deadline for one backend call.
    #[serde(default = "default_synth_timeout")]
    pub timeout_seconds: u64,

    /// Code longer than this many characters is truncated in the prompt.
    #[serde(default = "default_max_code_chars")]
    pub max_code_chars: usize,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: ProviderKind::default(),
            endpoint: None,
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            timeout_seconds: default_synth_timeout(),
            max_code_chars: default_max_code_chars(),
        }
    }
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_synth_timeout() -> u64 {
    10
}

fn default_max_code_chars() -> usize {
    20_000
}

impl SynthesizerConfig {
    /// Endpoint with the provider default applied and trailing slashes removed.
    pub fn effective_endpoint(&self) -> String {
        self.endpoint
            .as_deref()
            .unwrap_or_else(|| self.provider.default_endpoint())
            .trim_end_matches('/')
            .to_string()
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with startup arguments.
    ///
    /// Arguments (and their environment fallbacks) only override the file
    /// when they carry a value.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref bind) = args.bind {
            self.server.bind = bind.clone();
        }
        if let Some(ref language) = args.default_language {
            self.service.default_language = language.clone();
        }

        if let Some(provider) = args.provider {
            self.synthesizer.provider = provider;
        }
        if let Some(ref model) = args.model {
            self.synthesizer.model = model.clone();
        }
        if let Some(ref url) = args.backend_url {
            self.synthesizer.endpoint = Some(url.clone());
        }
        if let Some(ref key) = args.api_key {
            self.synthesizer.api_key = Some(key.clone());
        }
        if let Some(timeout) = args.backend_timeout {
            self.synthesizer.timeout_seconds = timeout;
        }
        if args.no_backend {
            self.synthesizer.enabled = false;
        }
    }

    /// Supported languages, parsed and de-duplicated in declaration order.
    pub fn languages(&self) -> Result<Vec<Language>> {
        let mut languages = Vec::new();
        for name in &self.service.languages {
            let language: Language = name
                .parse()
                .map_err(|_| anyhow::anyhow!("Unknown language in service.languages: {}", name))?;
            if !languages.contains(&language) {
                languages.push(language);
            }
        }
        Ok(languages)
    }

    pub fn default_language(&self) -> Result<Language> {
        self.service.default_language.parse().map_err(|_| {
            anyhow::anyhow!(
                "Unknown default language: {}",
                self.service.default_language
            )
        })
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        let languages = self.languages()?;
        if languages.is_empty() {
            bail!("service.languages must name at least one language");
        }

        let default_language = self.default_language()?;
        if !languages.contains(&default_language) {
            bail!(
                "Default language '{}' is not in service.languages",
                default_language
            );
        }

        for name in self.service.samples.keys().chain(self.checker.backends.keys()) {
            name.parse::<Language>()
                .map_err(|_| anyhow::anyhow!("Unknown language key: {}", name))?;
        }

        if self.checker.timeout_seconds == 0 {
            bail!("checker.timeout_seconds must be at least 1");
        }
        if self.synthesizer.timeout_seconds == 0 {
            bail!("synthesizer.timeout_seconds must be at least 1");
        }
        if self.synthesizer.max_code_chars == 0 {
            bail!("synthesizer.max_code_chars must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.synthesizer.temperature) {
            bail!("synthesizer.temperature must be between 0.0 and 2.0");
        }

        let endpoint = self.synthesizer.effective_endpoint();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            bail!("Backend endpoint must start with 'http://' or 'https://'");
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind, "127.0.0.1:5001");
        assert_eq!(config.synthesizer.model, "gpt-3.5-turbo");
        assert_eq!(config.synthesizer.timeout_seconds, 10);
        assert_eq!(config.synthesizer.max_code_chars, 20_000);
        assert_eq!(config.checker.max_warnings, 20);
        assert_eq!(config.languages().unwrap(), Language::ALL.to_vec());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[server]
bind = "0.0.0.0:8080"

[service]
languages = ["python", "js"]
default_language = "js"

[service.samples]
python = "print('hi')"

[checker]
timeout_seconds = 2

[checker.backends.python]
backend = "command"
command = ["python3", "check.py"]

[synthesizer]
provider = "ollama"
model = "codellama:13b"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(
            config.languages().unwrap(),
            vec![Language::Python, Language::JavaScript]
        );
        assert_eq!(config.default_language().unwrap(), Language::JavaScript);
        assert_eq!(config.checker.timeout_seconds, 2);

        let python = &config.checker.backends["python"];
        assert_eq!(python.backend, CheckerBackendKind::Command);
        assert_eq!(python.command, vec!["python3", "check.py"]);

        assert_eq!(config.synthesizer.provider, ProviderKind::Ollama);
        assert_eq!(config.synthesizer.effective_endpoint(), "http://localhost:11434");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_default_outside_languages() {
        let mut config = Config::default();
        config.service.languages = vec!["cpp".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_language() {
        let mut config = Config::default();
        config.service.languages.push("ruby".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_kind_defaults_to_auto() {
        let config: Config = toml::from_str("[checker.backends.python]\n").unwrap();
        assert_eq!(config.checker.backends["python"].backend, CheckerBackendKind::Auto);

        let config: Config =
            toml::from_str("[checker.backends.python]\nbackend = \"tree-sitter\"\n").unwrap();
        assert_eq!(
            config.checker.backends["python"].backend,
            CheckerBackendKind::TreeSitter
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[synthesizer]\napi_key = \"sk-test\"\ntimeout_seconds = 3").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.synthesizer.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.synthesizer.timeout_seconds, 3);
        assert_eq!(config.server.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[service]"));
        assert!(toml_str.contains("[synthesizer]"));
        assert!(!toml_str.contains("api_key"));
    }
}
