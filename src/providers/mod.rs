/*!
 * Provider adapters for the translation services.
 *
 * Every adapter turns one `TranslationRequest` into one chat-style HTTP call
 * and maps every failure onto the closed `ProviderError` taxonomy:
 * - OpenAI-compatible vendors (openai, groq, deepseek, mistral, openrouter)
 * - Anthropic
 * - Gemini
 * - Ollama
 *
 * Adapters are created by name through the `ProviderRegistry`.
 */

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};

use crate::app_config::ProviderSettings;
use crate::errors::ProviderError;

pub mod anthropic;
pub mod gemini;
pub mod mock;
pub mod ollama;
pub mod openai;

/// Body fragments that mark a rate limit regardless of status code
const RATE_LIMIT_PHRASES: [&str; 6] = [
    "rate limit",
    "too many requests",
    "quota",
    "exceeded",
    "throttled",
    "slow down",
];

/// Default HTTP client timeout; the dispatcher applies the configured per-call timeout on top
const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default Retry-After when the vendor sends none
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// One translation call
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationRequest {
    /// Marker-wrapped payload (or plain text)
    pub text: String,
    /// Rendered system prompt
    pub system_prompt: String,
    /// Model to call
    pub model: String,
    pub temperature: f32,
}

/// Common trait for all translation providers
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Registry name of the provider
    fn name(&self) -> &str;

    /// Translate one payload with the requested model
    async fn translate(&self, request: &TranslationRequest) -> Result<String, ProviderError>;
}

/// Shared HTTP client with the adapter default timeout
pub fn build_http_client() -> Client {
    Client::builder()
        .timeout(CLIENT_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Map a transport failure
pub fn classify_transport(error: &reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(error.to_string())
    } else {
        ProviderError::Transient(error.to_string())
    }
}

/// Map a non-success HTTP response
pub fn classify_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    default_retry_after: u64,
) -> ProviderError {
    let lowered = body.to_lowercase();
    let message = truncate(body, 500);

    if status == StatusCode::TOO_MANY_REQUESTS
        || RATE_LIMIT_PHRASES.iter().any(|phrase| lowered.contains(phrase))
    {
        let retry_after_secs = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()))
            .unwrap_or(default_retry_after);
        return ProviderError::RateLimited {
            retry_after_secs,
            message,
        };
    }

    match status.as_u16() {
        401 | 403 => ProviderError::Authentication(message),
        500..=599 => ProviderError::Transient(format!("HTTP {}: {}", status.as_u16(), message)),
        code => ProviderError::BadRequest {
            status_code: code,
            message,
        },
    }
}

/// Parse a Retry-After value given as delta seconds or as an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(seconds.ceil() as u64);
        }
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).num_seconds().max(0) as u64)
}

/// Reject whitespace-only results
pub fn ensure_non_empty(text: String) -> Result<String, ProviderError> {
    if text.trim().is_empty() {
        Err(ProviderError::EmptyResult)
    } else {
        Ok(text)
    }
}

/// Send a prepared request and return the body of a successful response
pub async fn send_request(request: RequestBuilder, default_retry_after: u64) -> Result<String, ProviderError> {
    let response = request.send().await.map_err(|e| classify_transport(&e))?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.map_err(|e| classify_transport(&e))?;

    if !status.is_success() {
        return Err(classify_response(status, &headers, &body, default_retry_after));
    }
    Ok(body)
}

/// Decode a JSON body, mapping garbage to a transient failure
pub fn parse_json<T: serde::de::DeserializeOwned>(provider: &str, body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| {
        ProviderError::Transient(format!(
            "{} returned an unreadable response ({}): {}",
            provider,
            e,
            truncate(body, 200)
        ))
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.trim().to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut.trim())
    }
}

/// Builds an adapter from its settings
pub type ProviderFactory = Arc<dyn Fn(&ProviderSettings) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// Name to adapter factory lookup
#[derive(Clone)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every built-in adapter
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for vendor in openai::COMPATIBLE_VENDORS {
            registry.register(vendor, |settings| {
                Ok(Arc::new(openai::OpenAiCompatible::from_settings(settings)) as Arc<dyn Provider>)
            });
        }
        registry.register("anthropic", |settings| {
            Ok(Arc::new(anthropic::Anthropic::from_settings(settings)) as Arc<dyn Provider>)
        });
        registry.register("gemini", |settings| {
            Ok(Arc::new(gemini::Gemini::from_settings(settings)) as Arc<dyn Provider>)
        });
        registry.register("ollama", |settings| {
            Ok(Arc::new(ollama::Ollama::from_settings(settings)) as Arc<dyn Provider>)
        });
        registry
    }

    /// Add or replace one entry
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&ProviderSettings) -> Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_lowercase(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build the adapter for a configured provider
    pub fn create(&self, settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
        let factory = self
            .factories
            .get(&settings.name.to_lowercase())
            .ok_or_else(|| anyhow!("No adapter registered for provider '{}'", settings.name))?;
        factory(settings)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
