//! Reasoning backend clients.
//!
//! This module implements the chat endpoints the synthesizer can talk to:
//! - OpenAI-compatible `/chat/completions` (bearer credential required)
//! - Ollama `/api/chat` (local, no credential)

use super::SynthesisError;
use crate::config::{ProviderKind, SynthesizerConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A black-box text generator: system + user prompt in, free text out.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String, SynthesisError>;
}

/// Build the backend described by the configuration.
///
/// A disabled or credential-less configuration still yields a backend; it
/// reports `BackendUnavailable` on every call so analyses degrade instead of
/// failing at startup.
pub fn from_config(config: &SynthesizerConfig) -> Result<Arc<dyn ReasoningBackend>> {
    if !config.enabled {
        info!("Reasoning backend disabled; analyses will be checker-only");
        return Ok(Arc::new(UnconfiguredBackend::new("backend disabled by configuration")));
    }

    let timeout = Duration::from_secs(config.timeout_seconds);
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")?;

    let endpoint = config.effective_endpoint();
    let backend: Arc<dyn ReasoningBackend> = match config.provider {
        ProviderKind::Openai => {
            let api_key = config
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty());
            match api_key {
                Some(key) => Arc::new(OpenAiBackend {
                    http_client,
                    endpoint,
                    api_key: key.to_string(),
                    model: config.model.clone(),
                    temperature: config.temperature,
                    timeout,
                }),
                None => {
                    info!("No API key configured; reasoning backend unavailable");
                    Arc::new(UnconfiguredBackend::new("no API key configured"))
                }
            }
        }
        ProviderKind::Ollama => Arc::new(OllamaBackend {
            http_client,
            endpoint,
            model: config.model.clone(),
            temperature: config.temperature,
            timeout,
        }),
    };

    info!("Reasoning backend: {} ({})", backend.name(), config.model);
    Ok(backend)
}

/// Stand-in used when no backend can be reached by construction.
pub struct UnconfiguredBackend {
    reason: String,
}

impl UnconfiguredBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ReasoningBackend for UnconfiguredBackend {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String, SynthesisError> {
        Err(SynthesisError::BackendUnavailable(self.reason.clone()))
    }
}

/// Message in the chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

fn chat_messages(system: &str, user: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system".to_string(),
            content: system.to_string(),
        },
        ChatMessage {
            role: "user".to_string(),
            content: user.to_string(),
        },
    ]
}

fn map_send_error(e: reqwest::Error, endpoint: &str, timeout: Duration) -> SynthesisError {
    if e.is_timeout() {
        SynthesisError::BackendTimeout(timeout)
    } else if e.is_connect() {
        SynthesisError::BackendError(format!("cannot connect to {}", endpoint))
    } else {
        SynthesisError::BackendError(format!("failed to send request: {}", e))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SynthesisError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();
    Err(SynthesisError::BackendError(format!("API error {}: {}", status, body)))
}

/// OpenAI chat completions request.
#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

/// OpenAI chat completions response.
#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiBackend {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

#[async_trait]
impl ReasoningBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, SynthesisError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let request = OpenAiChatRequest {
            model: self.model.clone(),
            messages: chat_messages(system, user),
            temperature: self.temperature,
        };

        debug!("POST {} ({} prompt chars)", url, system.len() + user.len());

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, &self.endpoint, self.timeout))?;

        let chat_response: OpenAiChatResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SynthesisError::BackendError(format!("malformed response: {}", e)))?;

        extract_openai_content(chat_response)
    }
}

fn extract_openai_content(response: OpenAiChatResponse) -> Result<String, SynthesisError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| SynthesisError::BackendError("response contained no choices".to_string()))
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// Client for a local Ollama server.
pub struct OllamaBackend {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    timeout: Duration,
}

#[async_trait]
impl ReasoningBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, SynthesisError> {
        let url = format!("{}/api/chat", self.endpoint);
        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages: chat_messages(system, user),
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        debug!("POST {} ({} prompt chars)", url, system.len() + user.len());

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, &self.endpoint, self.timeout))?;

        let chat_response: OllamaChatResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| SynthesisError::BackendError(format!("malformed response: {}", e)))?;

        Ok(chat_response.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            let reply = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(reply.as_bytes()).await;
        });

        format!("http://{}", addr)
    }

    /// Read headers and a content-length body so the client never sees a reset.
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if data.len() >= end + 4 + content_length {
                    return;
                }
            }
        }
    }

    // Bypass any proxy from the environment so requests reach the local socket.
    fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn openai(endpoint: String) -> OpenAiBackend {
        OpenAiBackend {
            http_client: local_client(),
            endpoint,
            api_key: "sk-test".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.3,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_openai_without_key_is_unavailable() {
        let config = SynthesizerConfig {
            api_key: None,
            ..SynthesizerConfig::default()
        };
        let backend = from_config(&config).unwrap();

        let err = backend.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, SynthesisError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_disabled_backend_is_unavailable() {
        let config = SynthesizerConfig {
            enabled: false,
            api_key: Some("sk-test".to_string()),
            ..SynthesizerConfig::default()
        };
        let backend = from_config(&config).unwrap();
        assert_eq!(backend.name(), "unconfigured");
    }

    #[tokio::test]
    async fn test_openai_reads_first_choice() {
        let endpoint = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"All good."}}]}"#,
        )
        .await;
        let backend = openai(endpoint);

        let text = backend.complete("system", "user").await.unwrap();
        assert_eq!(text, "All good.");
    }

    #[tokio::test]
    async fn test_ollama_reads_message() {
        let endpoint = serve_once(
            "200 OK",
            r#"{"message":{"role":"assistant","content":"Looks fine."},"done":true}"#,
        )
        .await;
        let backend = OllamaBackend {
            http_client: local_client(),
            endpoint,
            model: "llama3.2:latest".to_string(),
            temperature: 0.3,
            timeout: Duration::from_secs(5),
        };

        let text = backend.complete("system", "user").await.unwrap();
        assert_eq!(text, "Looks fine.");
    }

    #[tokio::test]
    async fn test_http_error_status_is_backend_error() {
        let endpoint = serve_once(
            "429 Too Many Requests",
            r#"{"error":{"message":"quota exceeded"}}"#,
        )
        .await;
        let backend = openai(endpoint);

        match backend.complete("system", "user").await.unwrap_err() {
            SynthesisError::BackendError(msg) => assert!(msg.contains("429")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_empty_choices_is_backend_error() {
        let response: OpenAiChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(
            extract_openai_content(response),
            Err(SynthesisError::BackendError(_))
        ));
    }
}
