use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app_config::ProviderSettings;
use crate::errors::ProviderError;
use crate::providers::{Provider, TranslationRequest, build_http_client, ensure_non_empty, parse_json, send_request};

/// Vendors served by the OpenAI chat completions schema
pub const COMPATIBLE_VENDORS: [&str; 5] = ["openai", "groq", "deepseek", "mistral", "openrouter"];

/// Client for any OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiCompatible {
    name: String,
    client: Client,
    api_key: String,
    /// Base URL including the version segment, e.g. `https://api.openai.com/v1`
    endpoint: String,
    default_retry_after: u64,
}

impl std::fmt::Debug for OpenAiCompatible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatible")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Chat completion request
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// system, user or assistant
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

impl OpenAiCompatible {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: build_http_client(),
            api_key: api_key.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            default_retry_after: crate::providers::DEFAULT_RETRY_AFTER_SECS,
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let mut client = Self::new(&settings.name, &settings.api_key, settings.endpoint());
        client.default_retry_after = settings.default_retry_after_secs;
        client
    }

    fn build_request(request: &TranslationRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: request.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(request.system_prompt.clone()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(request.text.clone()),
                },
            ],
            temperature: request.temperature,
        }
    }

    /// Text of the first choice
    pub fn extract_text(response: &ChatCompletionResponse) -> String {
        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provider for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.endpoint);
        debug!("{}: POST {} (model {})", self.name, url, request.model);

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::build_request(request));
        if self.name == "openrouter" {
            builder = builder.header("X-Title", "subflow");
        }

        let body = send_request(builder, self.default_retry_after).await?;
        let response: ChatCompletionResponse = parse_json(&self.name, &body)?;
        ensure_non_empty(Self::extract_text(&response))
    }
}
