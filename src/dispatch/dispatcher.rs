use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::app_config::{Config, ProviderSettings};
use crate::dispatch::health::ProviderHealth;
use crate::dispatch::ledger::RateLimitLedger;
use crate::dispatch::metrics::{Metrics, NoopMetrics};
use crate::dispatch::pacing::{CallPacer, with_pacing};
use crate::dispatch::rotator::{ModelRotator, ModelState};
use crate::errors::{ProviderError, ProviderFailure, TranslationError};
use crate::providers::{Provider, ProviderRegistry, TranslationRequest};
use crate::translation::context::TranslationContext;
use crate::translation::prompts::PromptTemplate;

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Consecutive provider failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit stays open
    pub circuit_cool_down: chrono::Duration,
    /// Hard limit for one adapter call
    pub call_timeout: Duration,
    pub temperature: f32,
    pub prompt: PromptTemplate,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            circuit_cool_down: chrono::Duration::minutes(3),
            call_timeout: Duration::from_secs(30),
            temperature: 0.3,
            prompt: PromptTemplate::default(),
        }
    }
}

impl DispatcherOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            failure_threshold: config.dispatch.circuit_breaker_threshold,
            circuit_cool_down: chrono::Duration::seconds(config.dispatch.circuit_breaker_cooldown_secs as i64),
            call_timeout: Duration::from_secs(config.dispatch.provider_timeout_secs.max(1)),
            temperature: config.translation.temperature,
            prompt: config
                .translation
                .system_prompt
                .as_deref()
                .map(PromptTemplate::new)
                .unwrap_or_default(),
        }
    }
}

/// Successful dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub text: String,
    pub provider: String,
    pub model: String,
    /// Adapter calls made during this dispatch, the successful one included
    pub attempts: u32,
}

struct ProviderEntry {
    settings: ProviderSettings,
    adapter: Arc<dyn Provider>,
    rotator: ModelRotator,
    health: Mutex<ProviderHealth>,
    pacer: CallPacer,
}

impl ProviderEntry {
    fn name(&self) -> &str {
        &self.settings.name
    }
}

enum ProviderRun {
    Done(DispatchOutcome),
    Exhausted { attempts: u32, last_error: String },
}

/// Ordered fallback across providers with per-model cooldown and per-provider circuit breaking
pub struct ProviderDispatcher {
    providers: Vec<ProviderEntry>,
    ledger: Arc<RateLimitLedger>,
    metrics: Arc<dyn Metrics>,
    options: DispatcherOptions,
}

impl ProviderDispatcher {
    pub fn new(ledger: Arc<RateLimitLedger>, options: DispatcherOptions) -> Self {
        Self {
            providers: Vec::new(),
            ledger,
            metrics: Arc::new(NoopMetrics),
            options,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Register a provider with its adapter
    pub fn with_provider(mut self, settings: ProviderSettings, adapter: Arc<dyn Provider>) -> Self {
        self.add_provider(settings, adapter);
        self
    }

    pub fn add_provider(&mut self, settings: ProviderSettings, adapter: Arc<dyn Provider>) {
        for model in &settings.models {
            self.ledger.initialize(&settings.name, model);
        }
        let entry = ProviderEntry {
            rotator: ModelRotator::new(settings.models.clone(), settings.max_retries),
            health: Mutex::new(ProviderHealth::default()),
            pacer: CallPacer::new(settings.min_interval()),
            adapter,
            settings,
        };
        self.providers.push(entry);
    }

    /// Dispatcher for every configured provider the registry can build
    pub fn from_config(
        config: &Config,
        registry: &ProviderRegistry,
        ledger: Arc<RateLimitLedger>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        let mut dispatcher = Self::new(ledger, DispatcherOptions::from_config(config)).with_metrics(metrics);
        for settings in config.providers_by_priority() {
            match registry.create(settings) {
                Ok(adapter) => {
                    info!(
                        "Provider {} enabled (priority {}, models: {})",
                        settings.name,
                        settings.priority,
                        settings.models.join(", ")
                    );
                    dispatcher.add_provider(settings.clone(), adapter);
                }
                Err(e) => warn!("Skipping provider {}: {}", settings.name, e),
            }
        }
        dispatcher
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.settings.name.clone()).collect()
    }

    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    pub fn ledger(&self) -> &Arc<RateLimitLedger> {
        &self.ledger
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.options
    }

    /// Copy of a provider's circuit state
    pub fn health(&self, provider: &str) -> Option<ProviderHealth> {
        self.entry(provider).map(|e| e.health.lock().clone())
    }

    /// Copy of a model's cooldown and error state
    pub fn model_state(&self, provider: &str, model: &str) -> Option<ModelState> {
        self.entry(provider)?.rotator.state(model)
    }

    fn entry(&self, provider: &str) -> Option<&ProviderEntry> {
        self.providers.iter().find(|p| p.name().eq_ignore_ascii_case(provider))
    }

    /// Eligible providers in priority order, preferred provider first
    fn candidates(&self, preferred: Option<&str>, failures: &mut Vec<ProviderFailure>) -> Vec<&ProviderEntry> {
        let now = Utc::now();
        let mut order = Vec::new();
        for entry in &self.providers {
            let health = entry.health.lock();
            if health.is_available(now) {
                order.push(entry);
            } else {
                let reason = if health.permanently_disabled {
                    "disabled after authentication failure".to_string()
                } else {
                    format!(
                        "circuit open until {}",
                        health.disabled_until.map(|t| t.to_rfc3339()).unwrap_or_default()
                    )
                };
                let last = health.last_error.clone().unwrap_or_default();
                failures.push(ProviderFailure {
                    provider: entry.name().to_string(),
                    message: if last.is_empty() { reason } else { format!("{} ({})", reason, last) },
                });
            }
        }
        order.sort_by(|a, b| {
            a.settings
                .priority
                .cmp(&b.settings.priority)
                .then_with(|| a.name().cmp(b.name()))
        });
        if let Some(preferred) = preferred {
            if let Some(pos) = order.iter().position(|e| e.name().eq_ignore_ascii_case(preferred)) {
                let entry = order.remove(pos);
                order.insert(0, entry);
            }
        }
        order
    }

    /// Translate `text`, falling back across models and providers
    pub async fn dispatch(
        &self,
        text: &str,
        context: &TranslationContext,
    ) -> Result<DispatchOutcome, TranslationError> {
        let system_prompt = if context.is_context_aware() {
            self.options
                .prompt
                .render_with_context(context.source_language.as_deref(), &context.target_language)
        } else {
            self.options
                .prompt
                .render(context.source_language.as_deref(), &context.target_language)
        };

        let mut failures = Vec::new();
        let candidates = self.candidates(context.preferred_provider.as_deref(), &mut failures);
        let mut attempts = 0;

        for entry in candidates {
            match self.run_provider(entry, text, &system_prompt, attempts).await {
                ProviderRun::Done(outcome) => return Ok(outcome),
                ProviderRun::Exhausted {
                    attempts: total,
                    last_error,
                } => {
                    attempts = total;
                    debug!("Provider {} exhausted: {}", entry.name(), last_error);
                    failures.push(ProviderFailure {
                        provider: entry.name().to_string(),
                        message: last_error,
                    });
                }
            }
        }

        warn!("No provider could translate the request after {} attempts", attempts);
        Err(TranslationError::NoProviderAvailable(failures))
    }

    async fn run_provider(
        &self,
        entry: &ProviderEntry,
        text: &str,
        system_prompt: &str,
        mut total_attempts: u32,
    ) -> ProviderRun {
        let name = entry.name();
        let max_attempts = entry.settings.max_retries.max(1);
        let mut excluded: HashSet<String> = HashSet::new();
        let mut attempts = 0;
        let mut last_error: Option<String> = None;

        while attempts < max_attempts {
            let now = Utc::now();
            let model = entry
                .rotator
                .next_model_where(now, |m| !excluded.contains(m) && self.ledger.may_use_at(name, m, now));
            let Some(model) = model else {
                if last_error.is_none() {
                    last_error = Some("no usable model (rate limited or cooling down)".to_string());
                }
                break;
            };
            // Another dispatch may have taken the last slot since the check above.
            let reserved_at = Utc::now();
            if !self.ledger.try_reserve_at(name, &model, reserved_at) {
                debug!("{}/{} reached its rate limit, trying another model", name, model);
                excluded.insert(model);
                continue;
            }

            attempts += 1;
            total_attempts += 1;
            self.metrics.provider_attempt(name, &model);
            debug!("Dispatching to {}/{} (attempt {})", name, model, attempts);

            let request = TranslationRequest {
                text: text.to_string(),
                system_prompt: system_prompt.to_string(),
                model: model.clone(),
                temperature: self.options.temperature,
            };
            // The deadline starts once the pacer releases the call.
            let call = async { tokio::time::timeout(self.options.call_timeout, entry.adapter.translate(&request)).await };
            let result = match with_pacing(&entry.pacer, call).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "no response within {}s",
                    self.options.call_timeout.as_secs()
                ))),
            };

            match result {
                Ok(text) => {
                    entry.health.lock().record_success();
                    entry.rotator.record_success(&model);
                    entry.rotator.advance(&model);
                    self.metrics.provider_success(name, &model);
                    return ProviderRun::Done(DispatchOutcome {
                        text,
                        provider: name.to_string(),
                        model,
                        attempts: total_attempts,
                    });
                }
                Err(error) => {
                    // Only successful calls count against the windows.
                    self.ledger.release_at(name, &model, reserved_at);
                    self.metrics.provider_failure(name, error.kind());
                    last_error = Some(format!("{}: {}", model, error));
                    match error {
                        ProviderError::RateLimited { retry_after_secs, .. } => {
                            info!("{}/{} rate limited, cooling down {}s", name, model, retry_after_secs);
                            entry
                                .rotator
                                .cool_down(&model, Utc::now() + chrono::Duration::seconds(retry_after_secs as i64));
                            excluded.insert(model);
                        }
                        ProviderError::Authentication(message) => {
                            warn!("{} rejected credentials, disabling for this run: {}", name, message);
                            entry.health.lock().disable_permanently(&message);
                            break;
                        }
                        other if other.counts_as_failure() => {
                            warn!("{}/{} failed: {}", name, model, other);
                            entry.rotator.record_failure(&model);
                            let tripped = entry.health.lock().record_failure(
                                Utc::now(),
                                self.options.failure_threshold,
                                self.options.circuit_cool_down,
                                &other.to_string(),
                            );
                            if tripped {
                                warn!("{} circuit opened after repeated failures", name);
                                break;
                            }
                            // Same model again only for failures that may pass on retry.
                            if !matches!(other, ProviderError::Timeout(_) | ProviderError::Transient(_)) {
                                excluded.insert(model);
                            }
                        }
                        other => {
                            warn!("{}/{} failed: {}", name, model, other);
                            excluded.insert(model);
                        }
                    }
                }
            }
        }

        ProviderRun::Exhausted {
            attempts: total_attempts,
            last_error: last_error.unwrap_or_else(|| "no attempt made".to_string()),
        }
    }
}
