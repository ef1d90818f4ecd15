use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{AppConfig, DEFAULT_HOST, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECONDS};
use crate::conversation::ChatMessage;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("endpoint returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("unreadable response: {0}")]
    Decode(#[source] reqwest::Error),
}

pub type InferenceResult<T> = std::result::Result<T, InferenceError>;

/// A blocking chat-completion endpoint.
///
/// Called from the worker thread only, hence `Send + Sync`.
pub trait ChatBackend: Send + Sync {
    fn chat(&self, messages: &[ChatMessage]) -> InferenceResult<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub host: String,
    pub model: String,
    pub timeout_seconds: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl From<&AppConfig> for EndpointConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            host: config.host.clone(),
            model: config.model.clone(),
            timeout_seconds: config.timeout_seconds,
        }
    }
}

/// Client for Ollama's non-streaming `/api/chat`.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::blocking::Client,
    config: EndpointConfig,
}

impl OllamaClient {
    pub fn new(config: EndpointConfig) -> InferenceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(InferenceError::Client)?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.host.trim_end_matches('/'), path)
    }
}

impl ChatBackend for OllamaClient {
    fn chat(&self, messages: &[ChatMessage]) -> InferenceResult<String> {
        let url = self.url("/api/chat");
        let request = OllamaChatRequest {
            model: &self.config.model,
            messages,
            stream: false,
        };
        tracing::info!(
            model = %self.config.model,
            messages = messages.len(),
            "sending chat request"
        );

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .map_err(|source| InferenceError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                message: error_message_from_body(&body),
            });
        }

        let parsed: OllamaChatResponse = response.json().map_err(InferenceError::Decode)?;
        Ok(parsed.message.content)
    }
}

#[derive(Serialize, Debug)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Deserialize, Debug, Default)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize, Debug)]
struct OllamaErrorBody {
    error: String,
}

fn error_message_from_body(body: &str) -> String {
    serde_json::from_str::<OllamaErrorBody>(body)
        .map(|parsed| parsed.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// Renders an error with its whole source chain, so transport causes such as
/// "connection refused" survive into user-facing text.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !rendered.contains(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer")]
    struct Outer(#[source] Inner);

    #[derive(Debug, Error)]
    #[error("connection refused")]
    struct Inner;

    #[test]
    fn error_chain_includes_nested_causes() {
        assert_eq!(error_chain(&Outer(Inner)), "outer: connection refused");
    }

    #[test]
    fn error_chain_skips_causes_already_in_the_message() {
        let err = InferenceError::Status {
            status: 404,
            message: "model not found".to_string(),
        };
        assert_eq!(error_chain(&err), "endpoint returned HTTP 404: model not found");
    }

    #[test]
    fn error_body_prefers_ollama_error_field() {
        assert_eq!(
            error_message_from_body(r#"{"error":"model 'x' not found"}"#),
            "model 'x' not found"
        );
        assert_eq!(error_message_from_body(" bad gateway \n"), "bad gateway");
    }

    #[test]
    fn endpoint_config_comes_from_app_config() {
        let app = AppConfig {
            host: "http://gpu-box:11434/".to_string(),
            model: "llava:13b".to_string(),
            timeout_seconds: 30,
            ..AppConfig::default()
        };
        let client = OllamaClient::new(EndpointConfig::from(&app)).unwrap();
        assert_eq!(client.url("/api/chat"), "http://gpu-box:11434/api/chat");
        assert_eq!(client.config().model, "llava:13b");
    }
}
