use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app_config::ProviderSettings;
use crate::errors::ProviderError;
use crate::providers::{Provider, TranslationRequest, build_http_client, ensure_non_empty, parse_json, send_request};

/// Google Gemini client for `models/{model}:generateContent`
pub struct Gemini {
    client: Client,
    api_key: String,
    /// Base URL including the API version, e.g. `.../v1beta`
    endpoint: String,
    default_retry_after: u64,
}

impl std::fmt::Debug for Gemini {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gemini").field("endpoint", &self.endpoint).finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    temperature: f32,
}

/// generateContent request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl Gemini {
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

    fn build_request(request: &TranslationRequest) -> GenerateContentRequest {
        GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: request.system_prompt.clone(),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: request.text.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
            },
        }
    }

    /// Concatenated text parts of the first candidate
    pub fn extract_text(response: &GenerateContentResponse) -> String {
        response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provider for Gemini {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<String, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, request.model);
        debug!("gemini: POST {}", url);

        let builder = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_request(request));

        let body = send_request(builder, self.default_retry_after).await?;
        let response: GenerateContentResponse = parse_json("gemini", &body)?;
        ensure_non_empty(Self::extract_text(&response))
    }
}
