use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app_config::ProviderSettings;
use crate::errors::ProviderError;
use crate::providers::{Provider, TranslationRequest, build_http_client, ensure_non_empty, parse_json, send_request};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_OUTPUT_TOKENS: u32 = 4096;

/// Anthropic client for the Messages API
pub struct Anthropic {
    client: Client,
    api_key: String,
    /// Base URL without the `/v1/messages` suffix
    endpoint: String,
    default_retry_after: u64,
}

impl std::fmt::Debug for Anthropic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Anthropic").field("endpoint", &self.endpoint).finish()
    }
}

/// Body of a `POST /v1/messages` call
#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    temperature: f32,
    messages: [Turn<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl MessagesReply {
    /// Joins every text part; tool and image parts are ignored
    fn text(&self) -> String {
        self.content
            .iter()
            .filter(|part| part.kind == "text")
            .map(|part| part.text.as_str())
            .collect()
    }
}

impl Anthropic {
    /// Create a new Anthropic client
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            default_retry_after: crate::providers::DEFAULT_RETRY_AFTER_SECS,
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let mut client = Self::new(&settings.api_key, settings.endpoint());
        client.default_retry_after = settings.default_retry_after_secs;
        client
    }
}

#[async_trait]
impl Provider for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<String, ProviderError> {
        let api_url = if self.endpoint.is_empty() {
            "https://api.anthropic.com/v1/messages".to_string()
        } else {
            format!("{}/v1/messages", self.endpoint)
        };
        debug!("anthropic: POST {} (model {})", api_url, request.model);

        let payload = MessagesBody {
            model: &request.model,
            max_tokens: MAX_OUTPUT_TOKENS,
            system: &request.system_prompt,
            temperature: request.temperature,
            messages: [Turn {
                role: "user",
                content: &request.text,
            }],
        };

        let builder = self
            .client
            .post(&api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload);

        let body = send_request(builder, self.default_retry_after).await?;
        let reply: MessagesReply = parse_json("anthropic", &body)?;
        ensure_non_empty(reply.text())
    }
}
