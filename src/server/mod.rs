//! HTTP front end for the orchestrator.
//!
//! Routes:
//! - `POST /analyze`: run an analysis on `{ "code", "language" }`
//! - `POST /analyze/events`: same request, answered as one server-sent
//!   `analysis_complete` event for push-style clients
//! - `GET /test`: liveness and capability report
//! - `OPTIONS *`: CORS preflight

use crate::analysis::orchestrator::INTERNAL_ERROR_MESSAGE;
use crate::analysis::{Analysis, AnalysisStatus, Orchestrator, ValidationError};
use crate::config::ServerConfig;
use crate::models::{AnalysisResult, RawAnalysisRequest};
use anyhow::{Context, Result};
use chrono::Utc;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const NOT_JSON_MESSAGE: &str = "Request body must be JSON";

/// Event name carried by pushed results.
pub const COMPLETE_EVENT: &str = "analysis_complete";

/// Serves the analysis API over HTTP/1.
pub struct Server {
    orchestrator: Arc<Orchestrator>,
    bind_address: SocketAddr,
    allowed_origins: Vec<String>,
    max_body_bytes: usize,
}

impl Server {
    pub fn new(orchestrator: Arc<Orchestrator>, config: &ServerConfig) -> Result<Self> {
        let bind_address: SocketAddr = config
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", config.bind))?;

        Ok(Self {
            orchestrator,
            bind_address,
            allowed_origins: config.allowed_origins.clone(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Bind the configured address and serve until the task is dropped.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.bind_address)
            .await
            .with_context(|| format!("Failed to bind {}", self.bind_address))?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr().context("Listener has no local address")?;
        info!("Listening on http://{}", local);
        info!(
            "Languages: {}",
            self.orchestrator
                .languages()
                .iter()
                .map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let server = Arc::new(self);
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let server = Arc::clone(&server);

            tokio::task::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {}", remote_addr, err);
                }
            });
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let origin = header_str(req.headers(), header::ORIGIN).map(str::to_string);
        debug!("{} {}", method, path);

        let body = if method == Method::POST {
            match Limited::new(req.into_body(), self.max_body_bytes).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                    warn!("Rejected request body over {} bytes", self.max_body_bytes);
                    let result = AnalysisResult::failure(format!(
                        "Request body exceeds {} bytes",
                        self.max_body_bytes
                    ));
                    return self.finish(
                        json_response(StatusCode::PAYLOAD_TOO_LARGE, &result),
                        origin.as_deref(),
                    );
                }
                Err(e) => {
                    warn!("Failed to read request body: {}", e);
                    let result = AnalysisResult::failure("Failed to read request body");
                    return self.finish(
                        json_response(StatusCode::BAD_REQUEST, &result),
                        origin.as_deref(),
                    );
                }
            }
        } else {
            Bytes::new()
        };

        self.dispatch(&method, &path, origin.as_deref(), body).await
    }

    /// Route a fully-read request.
    pub async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        origin: Option<&str>,
        body: Bytes,
    ) -> Response<Full<Bytes>> {
        let response = match (method, path) {
            (&Method::OPTIONS, _) => empty_response(StatusCode::NO_CONTENT),
            (&Method::POST, "/analyze") => self.analyze(&body).await,
            (&Method::POST, "/analyze/events") => self.analyze_events(&body).await,
            (&Method::GET, "/test") => self.status(),
            (_, "/analyze") | (_, "/analyze/events") | (_, "/test") => json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &AnalysisResult::failure(format!("Method {} not allowed on {}", method, path)),
            ),
            _ => json_response(
                StatusCode::NOT_FOUND,
                &AnalysisResult::failure(format!("No route for {}", path)),
            ),
        };

        self.finish(response, origin)
    }

    async fn analyze(&self, body: &[u8]) -> Response<Full<Bytes>> {
        let analysis = match parse_request(body) {
            Ok(raw) => self.orchestrator.analyze(raw).await,
            Err(e) => {
                info!("Rejected malformed request: {}", e);
                Analysis::rejected(e)
            }
        };

        debug!("Analysis path: {}", analysis.path());
        json_response(status_code(analysis.status), &analysis.result)
    }

    /// Run the analysis on its own task and answer with the result it pushes.
    /// Malformed requests are answered like `/analyze`.
    async fn analyze_events(&self, body: &[u8]) -> Response<Full<Bytes>> {
        let raw = match parse_request(body) {
            Ok(raw) => raw,
            Err(e) => {
                info!("Rejected malformed request: {}", e);
                let analysis = Analysis::rejected(e);
                return json_response(status_code(analysis.status), &analysis.result);
            }
        };

        let (tx, mut rx) = mpsc::channel(1);
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            let analysis = orchestrator.analyze_and_notify(raw, tx).await;
            debug!("Pushed analysis path: {}", analysis.path());
        });

        match rx.recv().await {
            Some(result) => event_response(COMPLETE_EVENT, &result),
            None => {
                error!("Analysis task ended without pushing a result");
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &AnalysisResult::failure(INTERNAL_ERROR_MESSAGE),
                )
            }
        }
    }

    fn status(&self) -> Response<Full<Bytes>> {
        info!("Status endpoint accessed");
        let languages: Vec<&str> = self
            .orchestrator
            .languages()
            .iter()
            .map(|l| l.as_str())
            .collect();

        json_response(
            StatusCode::OK,
            &json!({
                "status": "success",
                "message": "Backend is working",
                "version": env!("CARGO_PKG_VERSION"),
                "endpoints": {
                    "analyze": "POST /analyze",
                    "events": "POST /analyze/events",
                    "test": "GET /test",
                },
                "languages": languages,
                "default_language": self.orchestrator.default_language().as_str(),
                "time": Utc::now().to_rfc3339(),
            }),
        )
    }

    /// Attach CORS headers when the caller's origin is allowed.
    fn finish(&self, mut response: Response<Full<Bytes>>, origin: Option<&str>) -> Response<Full<Bytes>> {
        let Some(origin) = origin else {
            return response;
        };
        if !self.allowed_origins.iter().any(|allowed| allowed == "*" || allowed == origin) {
            return response;
        }

        if let Ok(value) = HeaderValue::from_str(origin) {
            let headers = response.headers_mut();
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static("GET, POST, OPTIONS"),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static("Content-Type"),
            );
            headers.insert(header::VARY, HeaderValue::from_static("Origin"));
        }
        response
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Decode the request body. Both fields are optional; anything that is not
/// a JSON object is malformed.
fn parse_request(body: &[u8]) -> Result<RawAnalysisRequest, ValidationError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|_| ValidationError::MalformedRequest(NOT_JSON_MESSAGE.to_string()))?;

    if !value.is_object() {
        return Err(ValidationError::MalformedRequest(
            "Request body must be a JSON object".to_string(),
        ));
    }

    serde_json::from_value(value).map_err(|e| {
        ValidationError::MalformedRequest(format!("Malformed request: {}", e))
    })
}

pub fn status_code(status: AnalysisStatus) -> StatusCode {
    match status {
        AnalysisStatus::Completed => StatusCode::OK,
        AnalysisStatus::Rejected => StatusCode::BAD_REQUEST,
        AnalysisStatus::Inoperable => StatusCode::SERVICE_UNAVAILABLE,
        AnalysisStatus::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"error":"Internal error while analyzing code"}"#.to_vec(),
            )
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// A single server-sent event whose data line is `body` as JSON.
fn event_response<T: serde::Serialize>(event: &str, body: &T) -> Response<Full<Bytes>> {
    let data = match serde_json::to_string(body) {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &AnalysisResult::failure(INTERNAL_ERROR_MESSAGE),
            );
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(format!(
        "event: {}\ndata: {}\n\n",
        event, data
    ))));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{CheckerRegistry, TreeSitterChecker};
    use crate::models::Language;
    use crate::synth::backend::UnconfiguredBackend;
    use crate::synth::Synthesizer;
    use std::time::Duration;

    fn test_server(max_body_bytes: usize) -> Server {
        let mut registry = CheckerRegistry::new();
        registry.register(
            Language::Python,
            Arc::new(TreeSitterChecker::new(Language::Python, 20)),
        );
        let synthesizer = Synthesizer::new(
            Arc::new(UnconfiguredBackend::new("disabled in tests")),
            Duration::from_secs(1),
            20_000,
        );
        let orchestrator = Arc::new(Orchestrator::new(registry, synthesizer));

        let config = ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            max_body_bytes,
            ..ServerConfig::default()
        };
        tokio_test::assert_ok!(Server::new(orchestrator, &config))
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_reports_syntax_error() {
        let server = test_server(1024);
        let response = server
            .dispatch(
                &Method::POST,
                "/analyze",
                None,
                Bytes::from(r#"{"code": "for i in range(5) print(i)", "language": "python"}"#),
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let errors = json["errors"].as_array().unwrap();
        assert!(errors[0].as_str().unwrap().contains("expected ':'"));
        assert!(json.get("error").is_none());
        assert!(json.get("ai_analysis").is_none());
    }

    #[tokio::test]
    async fn test_analyze_events_pushes_result() {
        let server = test_server(1024);
        let response = server
            .dispatch(
                &Method::POST,
                "/analyze/events",
                None,
                Bytes::from(r#"{"code": "for i in range(5) print(i)", "language": "python"}"#),
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("event: analysis_complete"));
        let data = lines.next().unwrap().strip_prefix("data: ").unwrap();
        let json: serde_json::Value = serde_json::from_str(data).unwrap();
        assert!(json["errors"][0].as_str().unwrap().contains("expected ':'"));
        assert!(text.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn test_analyze_events_rejects_malformed_body() {
        let server = test_server(1024);
        let response = server
            .dispatch(&Method::POST, "/analyze/events", None, Bytes::from("[1]"))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );

        let response = server
            .dispatch(&Method::GET, "/analyze/events", None, Bytes::new())
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_unsupported_language_is_bad_request() {
        let server = test_server(1024);
        let response = server
            .dispatch(
                &Method::POST,
                "/analyze",
                None,
                Bytes::from(r#"{"code": "puts 1", "language": "ruby"}"#),
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Unsupported language: ruby"})
        );
    }

    #[tokio::test]
    async fn test_non_json_body_is_bad_request() {
        let server = test_server(1024);
        let response = server
            .dispatch(&Method::POST, "/analyze", None, Bytes::from("code=1"))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, json!({"error": NOT_JSON_MESSAGE}));
    }

    #[tokio::test]
    async fn test_wrong_field_type_is_bad_request() {
        let server = test_server(1024);
        let response = server
            .dispatch(&Method::POST, "/analyze", None, Bytes::from(r#"{"code": 5}"#))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let server = test_server(1024);
        let response = server.dispatch(&Method::GET, "/test", None, Bytes::new()).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "success");
        assert_eq!(json["endpoints"]["analyze"], "POST /analyze");
        assert_eq!(json["languages"], json!(["python"]));
        assert!(json["time"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_route_and_method() {
        let server = test_server(1024);

        let response = server.dispatch(&Method::GET, "/nope", None, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = server.dispatch(&Method::GET, "/analyze", None, Bytes::new()).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_cors_preflight_for_allowed_origin() {
        let server = test_server(1024);
        let response = server
            .dispatch(
                &Method::OPTIONS,
                "/analyze",
                Some("http://localhost:3000"),
                Bytes::new(),
            )
            .await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn test_cors_not_echoed_for_unknown_origin() {
        let server = test_server(1024);
        let response = server
            .dispatch(&Method::GET, "/test", Some("http://evil.example"), Bytes::new())
            .await;

        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(status_code(AnalysisStatus::Completed), StatusCode::OK);
        assert_eq!(status_code(AnalysisStatus::Rejected), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_code(AnalysisStatus::Inoperable),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_code(AnalysisStatus::Internal),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_invalid_bind_address() {
        let config = ServerConfig {
            bind: "not an address".to_string(),
            ..ServerConfig::default()
        };
        let server = test_server(1024);
        assert!(Server::new(server.orchestrator, &config).is_err());
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(test_server(128).serve(listener));

        let client = reqwest::Client::builder().no_proxy().build().unwrap();

        let response = client
            .post(format!("http://{}/analyze", addr))
            .json(&json!({"code": "for i in range(5): print(i)", "language": "py"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let json: serde_json::Value = response.json().await.unwrap();
        assert_eq!(json["errors"], json!([]));

        let response = client
            .post(format!("http://{}/analyze", addr))
            .body("x".repeat(1000))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
    }
}
