use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app_config::ProviderSettings;
use crate::errors::ProviderError;
use crate::providers::{Provider, TranslationRequest, build_http_client, ensure_non_empty, parse_json, send_request};

const DEFAULT_PORT: u16 = 11434;

/// Ollama client for the local `/api/chat` endpoint
pub struct Ollama {
    /// Base URL of the Ollama API
    base_url: String,
    /// HTTP client for making requests
    client: Client,
    /// Optional bearer token for proxied deployments
    api_key: String,
    default_retry_after: u64,
}

impl std::fmt::Debug for Ollama {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ollama").field("base_url", &self.base_url).finish()
    }
}

/// Chat message object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender (system, user, assistant)
    pub role: String,
    /// Content of the message
    #[serde(default)]
    pub content: String,
}

/// Generation options for the Ollama API
#[derive(Debug, Serialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Chat request for the Ollama API
#[derive(Debug, Serialize)]
pub struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerationOptions>,
    stream: bool,
}

/// Chat response from the Ollama API
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    /// Response message
    pub message: ChatMessage,
    /// Whether the generation is complete
    #[serde(default)]
    pub done: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            options: None,
            stream: false,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.options = Some(GenerationOptions {
            temperature: Some(temperature),
        });
        self
    }
}

impl Ollama {
    /// Client for a host given as `host`, `host:port` or a full URL
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            base_url: Self::normalize_base_url(&url.into()),
            client: build_http_client(),
            api_key: String::new(),
            default_retry_after: crate::providers::DEFAULT_RETRY_AFTER_SECS,
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let mut client = Self::from_url(settings.endpoint());
        client.api_key = settings.api_key.clone();
        client.default_retry_after = settings.default_retry_after_secs;
        client
    }

    /// Add a scheme and the default port when missing
    pub fn normalize_base_url(host: &str) -> String {
        let host = host.trim().trim_end_matches('/');
        if host.is_empty() {
            return format!("http://localhost:{}", DEFAULT_PORT);
        }
        let (scheme, rest) = match host.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("http", host),
        };
        let authority = rest.split('/').next().unwrap_or(rest);
        if authority.contains(':') {
            format!("{}://{}", scheme, rest)
        } else {
            format!("{}://{}:{}{}", scheme, authority, DEFAULT_PORT, &rest[authority.len()..])
        }
    }

    /// Parse a chat body; streamed JSONL bodies are concatenated
    pub fn parse_chat_body(body: &str) -> Result<String, ProviderError> {
        if let Ok(response) = serde_json::from_str::<ChatResponse>(body) {
            return Ok(response.message.content);
        }

        let lines: Vec<&str> = body.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() > 1 {
            let mut full_response = String::new();
            let mut parsed_any = false;
            for line in lines {
                if let Ok(chunk) = serde_json::from_str::<ChatResponse>(line) {
                    full_response.push_str(&chunk.message.content);
                    parsed_any = true;
                }
            }
            if parsed_any {
                return Ok(full_response);
            }
        }

        let response: ChatResponse = parse_json("ollama", body)?;
        Ok(response.message.content)
    }
}

#[async_trait]
impl Provider for Ollama {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<String, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        debug!("ollama: POST {} (model {})", url, request.model);

        let payload = ChatRequest::new(
            &request.model,
            vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.text.clone(),
                },
            ],
        )
        .temperature(request.temperature);

        let mut builder = self.client.post(&url).json(&payload);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let body = send_request(builder, self.default_retry_after).await?;
        ensure_non_empty(Self::parse_chat_body(&body)?)
    }
}
