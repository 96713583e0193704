/*!
 * Scripted provider for tests.
 *
 * A `MockProvider` answers from a queue of scripted replies first and falls
 * back to its default behavior once the queue is empty:
 * - `MockReply::Translate` decodes the BLOCK sections of the payload,
 *   translates each one (dictionary lookup, else `[name] text`) and re-wraps them
 * - `MockReply::Echo` returns the payload unchanged
 * - `MockReply::Text` / `MockReply::Error` return fixed outcomes
 */

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::ProviderError;
use crate::providers::{Provider, TranslationRequest, ensure_non_empty};
use crate::translation::markers;

/// One scripted answer
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Translate every block of the payload
    Translate,
    /// Return the payload unchanged
    Echo,
    /// Translate, then delete the end marker of block `k`
    DropEndMarker(usize),
    /// Fixed text
    Text(String),
    /// Fixed failure
    Error(ProviderError),
}

/// Mock provider for dispatcher, batch and pipeline tests
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    default_reply: MockReply,
    script: Mutex<VecDeque<MockReply>>,
    dictionary: HashMap<String, String>,
    delay: Option<Duration>,
    request_count: AtomicUsize,
    requests: Mutex<Vec<TranslationRequest>>,
}

impl MockProvider {
    /// Provider that translates every request
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            default_reply: MockReply::Translate,
            script: Mutex::new(VecDeque::new()),
            dictionary: HashMap::new(),
            delay: None,
            request_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Provider that always fails with `error`
    pub fn failing(name: &str, error: ProviderError) -> Self {
        Self::new(name).with_default(MockReply::Error(error))
    }

    /// Reply used once the script is exhausted
    pub fn with_default(mut self, reply: MockReply) -> Self {
        self.default_reply = reply;
        self
    }

    /// Queue a scripted reply
    pub fn then(self, reply: MockReply) -> Self {
        self.script.lock().push_back(reply);
        self
    }

    /// Fixed translation for one source text
    pub fn with_translation(mut self, source: &str, translated: &str) -> Self {
        self.dictionary.insert(source.to_string(), translated.to_string());
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `translate` calls so far
    pub fn call_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<TranslationRequest> {
        self.requests.lock().clone()
    }

    /// Models requested, in order
    pub fn models_called(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.model.clone()).collect()
    }

    fn translate_text(&self, text: &str) -> String {
        self.dictionary
            .get(text)
            .cloned()
            .unwrap_or_else(|| format!("[{}] {}", self.name, text))
    }

    /// Translated payload, preserving the marker structure
    pub fn translate_payload(&self, payload: &str) -> String {
        let blocks = markers::scan_payloads(payload);
        if blocks.is_empty() {
            return self.translate_text(payload.trim());
        }
        blocks
            .iter()
            .map(|(k, text)| {
                format!(
                    "{}\n{}\n{}",
                    markers::start_marker(*k),
                    self.translate_text(text),
                    markers::end_marker(*k)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn answer(&self, reply: MockReply, request: &TranslationRequest) -> Result<String, ProviderError> {
        match reply {
            MockReply::Translate => ensure_non_empty(self.translate_payload(&request.text)),
            MockReply::Echo => ensure_non_empty(request.text.clone()),
            MockReply::DropEndMarker(k) => {
                let translated = self.translate_payload(&request.text);
                ensure_non_empty(translated.replace(&markers::end_marker(k), ""))
            }
            MockReply::Text(text) => ensure_non_empty(text),
            MockReply::Error(error) => Err(error),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<String, ProviderError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());
        self.answer(reply, request)
    }
}
