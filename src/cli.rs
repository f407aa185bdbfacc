//! Startup argument parsing.
//!
//! The service is configured from `.codemedic.toml` and the environment;
//! these arguments exist so each setting can be overridden at launch,
//! with every flag backed by an environment variable.

use crate::config::ProviderKind;
use clap::Parser;
use std::path::PathBuf;

/// CodeMedic - code snippet analysis service
///
/// Accepts `{code, language}` over HTTP, checks the code with a
/// language-specific checker, asks an LLM for suggestions, and returns
/// one merged JSON report.
///
/// Examples:
///   codemedic
///   codemedic --bind 0.0.0.0:5001 --provider ollama --model codellama:13b
///   OPENAI_API_KEY=sk-... codemedic --config ./codemedic.toml
///   codemedic --init-config
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .codemedic.toml in the current directory
    #[arg(short, long, value_name = "FILE", env = "CODEMEDIC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g. 127.0.0.1:5001)
    #[arg(short, long, value_name = "ADDR", env = "CODEMEDIC_BIND")]
    pub bind: Option<String>,

    /// Language used when a request does not name one
    #[arg(long, value_name = "LANG", env = "CODEMEDIC_DEFAULT_LANGUAGE")]
    pub default_language: Option<String>,

    /// Reasoning backend protocol
    #[arg(long, value_name = "PROVIDER", env = "CODEMEDIC_PROVIDER")]
    pub provider: Option<ProviderKind>,

    /// Model name passed to the reasoning backend
    #[arg(short, long, env = "CODEMEDIC_MODEL")]
    pub model: Option<String>,

    /// Reasoning backend base URL
    #[arg(long, value_name = "URL", env = "CODEMEDIC_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Reasoning backend credential
    #[arg(long, value_name = "KEY", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Reasoning backend deadline in seconds
    #[arg(long, value_name = "SECS", env = "CODEMEDIC_BACKEND_TIMEOUT")]
    pub backend_timeout: Option<u64>,

    /// Disable the reasoning backend (checker-only analyses)
    #[arg(long)]
    pub no_backend: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .codemedic.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.backend_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Backend URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref bind) = self.bind {
            if bind.parse::<std::net::SocketAddr>().is_err() {
                return Err(format!("Invalid bind address: {}", bind));
            }
        }

        if let Some(timeout) = self.backend_timeout {
            if timeout == 0 {
                return Err("Backend timeout must be at least 1 second".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_conflicting_options() {
        let args = Args {
            verbose: true,
            quiet: true,
            ..Args::default()
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_backend_url() {
        let mut args = Args {
            backend_url: Some("localhost:11434".to_string()),
            ..Args::default()
        };
        assert!(args.validate().is_err());

        args.backend_url = Some("http://localhost:11434".to_string());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_bind_address() {
        let args = Args {
            bind: Some("not-an-address".to_string()),
            ..Args::default()
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_parse_from_flags() {
        let args = Args::parse_from([
            "codemedic",
            "--provider",
            "ollama",
            "--model",
            "codellama:13b",
            "--no-backend",
        ]);
        assert_eq!(args.provider, Some(ProviderKind::Ollama));
        assert_eq!(args.model.as_deref(), Some("codellama:13b"));
        assert!(args.no_backend);
    }

    #[test]
    fn test_log_level() {
        let mut args = Args::default();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
