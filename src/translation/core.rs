/*!
 * Cache-fronted translation service.
 *
 * `TranslationService` owns the dispatcher and the cache. Plain text goes
 * through `translate`, which consults the cache, splits long inputs into
 * line-aligned chunks and stores the joined result. Batch payloads go
 * through `dispatch_payload`, which never touches the cache because
 * batches are cached per block by the caller.
 */

use std::sync::Arc;

use log::debug;

use crate::app_config::Config;
use crate::dispatch::{DispatchOutcome, Metrics, NoopMetrics, ProviderDispatcher};
use crate::errors::TranslationError;
use crate::translation::cache::{CacheKeyFields, TranslationCache};
use crate::translation::context::TranslationContext;

/// Translation front door shared by every file of a run
pub struct TranslationService {
    dispatcher: Arc<ProviderDispatcher>,
    cache: TranslationCache,
    metrics: Arc<dyn Metrics>,
    /// Maximum source characters per dispatched call
    chunk_size: usize,
    preserve_formatting: bool,
}

impl TranslationService {
    pub fn new(dispatcher: Arc<ProviderDispatcher>, cache: TranslationCache) -> Self {
        Self {
            dispatcher,
            cache,
            metrics: Arc::new(NoopMetrics),
            chunk_size: 4000,
            preserve_formatting: true,
        }
    }

    pub fn from_config(
        config: &Config,
        dispatcher: Arc<ProviderDispatcher>,
        cache: TranslationCache,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            dispatcher,
            cache,
            metrics,
            chunk_size: config.translation.chunk_size.max(1),
            preserve_formatting: config.translation.preserve_formatting,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Arc<ProviderDispatcher> {
        &self.dispatcher
    }

    pub fn metrics(&self) -> &Arc<dyn Metrics> {
        &self.metrics
    }

    /// Cache key for `text` under `context`
    pub fn cache_key(&self, text: &str, context: &TranslationContext) -> String {
        TranslationCache::generate_key(&CacheKeyFields {
            source_text: text,
            target_language: &context.target_language,
            provider: context.preferred_provider.as_deref(),
            mode: context.mode,
            preserve_formatting: self.preserve_formatting,
        })
    }

    /// Cached translation of `text`, counted as hit or miss
    pub fn cached(&self, text: &str, context: &TranslationContext) -> Option<String> {
        let hit = self.cache.get(&self.cache_key(text, context));
        match hit {
            Some(_) => self.metrics.cache_hit(),
            None => self.metrics.cache_miss(),
        }
        hit
    }

    pub fn store(&self, text: &str, context: &TranslationContext, translation: &str) {
        self.cache.set(&self.cache_key(text, context), translation);
    }

    /// Translate free text through the cache
    pub async fn translate(&self, text: &str, context: &TranslationContext) -> Result<String, TranslationError> {
        if let Some(hit) = self.cached(text, context) {
            return Ok(hit);
        }

        let chunks = split_into_chunks(text, self.chunk_size);
        debug!("Translating {} chars in {} chunk(s)", text.chars().count(), chunks.len());

        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            parts.push(self.dispatch_payload(chunk, context).await?.text);
        }
        let translated = parts.join("\n");

        self.store(text, context, &translated);
        Ok(translated)
    }

    /// Send a prepared payload without caching
    pub async fn dispatch_payload(
        &self,
        payload: &str,
        context: &TranslationContext,
    ) -> Result<DispatchOutcome, TranslationError> {
        let outcome = self.dispatcher.dispatch(payload, context).await?;
        debug!(
            "Payload translated by {}/{} after {} attempt(s)",
            outcome.provider, outcome.model, outcome.attempts
        );
        Ok(outcome)
    }
}

/// Split at line boundaries so no chunk exceeds `max_chars` unless one line does
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for line in text.lines() {
        let line_len = line.chars().count();
        let joined_len = if current.is_empty() { line_len } else { current_len + 1 + line_len };
        if !current.is_empty() && joined_len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
