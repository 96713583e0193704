use anyhow::{Context, Result, anyhow};
use log::{LevelFilter, debug};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Application configuration module
///
/// Configuration is a JSON document (optional) overlaid with key/value
/// environment options. Providers are enabled by the presence of their
/// credential; everything else falls back to per-vendor defaults.

/// Providers with built-in adapters, in default fallback order
pub const KNOWN_PROVIDERS: [&str; 8] = [
    "openai", "anthropic", "gemini", "groq", "deepseek", "mistral", "openrouter", "ollama",
];

/// Request ceilings for the minute and day windows
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimits {
    /// Requests per minute
    #[serde(default)]
    pub per_minute: Option<u32>,

    /// Requests per UTC day
    #[serde(default)]
    pub per_day: Option<u32>,
}

impl RateLimits {
    pub fn new(per_minute: Option<u32>, per_day: Option<u32>) -> Self {
        Self { per_minute, per_day }
    }

    pub fn unlimited() -> Self {
        Self::default()
    }
}

/// One configured translation provider
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderSettings {
    // @field: Registry name (openai, gemini, ...)
    pub name: String,

    // @field: Credential
    #[serde(default)]
    pub api_key: String,

    // @field: Fallback order, smaller is tried first
    #[serde(default)]
    pub priority: u32,

    // @field: Ordered model list
    #[serde(default)]
    pub models: Vec<String>,

    // @field: Provider-wide window limits
    #[serde(default)]
    pub rate_limits: RateLimits,

    // @field: Per-model overrides of the window limits
    #[serde(default)]
    pub model_rate_limits: BTreeMap<String, RateLimits>,

    // @field: Attempt cap per dispatch and model error threshold
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    // @field: Minimum interval between two calls
    #[serde(default)]
    pub min_interval_ms: u64,

    // @field: Endpoint override
    #[serde(default)]
    pub base_url: String,

    // @field: Cooldown for rate-limit responses without Retry-After, from RATE_LIMIT_RESET_TIME
    #[serde(skip, default = "default_rate_limit_reset_secs")]
    pub default_retry_after_secs: u64,
}

struct VendorDefaults {
    base_url: &'static str,
    models: &'static [&'static str],
    limits: RateLimits,
    min_interval_ms: u64,
}

// Free tiers are paced well below their published ceilings.
fn vendor_defaults(name: &str) -> Option<VendorDefaults> {
    let defaults = match name {
        "openai" => VendorDefaults {
            base_url: "https://api.openai.com/v1",
            models: &["gpt-4o-mini", "gpt-4o"],
            limits: RateLimits::new(Some(500), None),
            min_interval_ms: 0,
        },
        "anthropic" => VendorDefaults {
            base_url: "https://api.anthropic.com",
            models: &["claude-3-5-haiku-latest", "claude-3-5-sonnet-latest"],
            limits: RateLimits::new(Some(45), None),
            min_interval_ms: 0,
        },
        "gemini" => VendorDefaults {
            base_url: "https://generativelanguage.googleapis.com/v1beta",
            models: &["gemini-2.0-flash", "gemini-1.5-flash"],
            limits: RateLimits::new(Some(15), Some(1500)),
            min_interval_ms: 4000,
        },
        "groq" => VendorDefaults {
            base_url: "https://api.groq.com/openai/v1",
            models: &["llama-3.3-70b-versatile", "llama-3.1-8b-instant"],
            limits: RateLimits::new(Some(30), Some(14400)),
            min_interval_ms: 2000,
        },
        "deepseek" => VendorDefaults {
            base_url: "https://api.deepseek.com/v1",
            models: &["deepseek-chat"],
            limits: RateLimits::new(Some(60), None),
            min_interval_ms: 1000,
        },
        "mistral" => VendorDefaults {
            base_url: "https://api.mistral.ai/v1",
            models: &["mistral-small-latest", "open-mistral-nemo"],
            limits: RateLimits::new(Some(60), None),
            min_interval_ms: 1000,
        },
        "openrouter" => VendorDefaults {
            base_url: "https://openrouter.ai/api/v1",
            models: &["meta-llama/llama-3.3-70b-instruct:free"],
            limits: RateLimits::new(Some(20), Some(200)),
            min_interval_ms: 6000,
        },
        "ollama" => VendorDefaults {
            base_url: "http://localhost:11434",
            models: &["llama3.1"],
            limits: RateLimits::unlimited(),
            min_interval_ms: 0,
        },
        _ => return None,
    };
    Some(defaults)
}

impl ProviderSettings {
    // @param name: Registry name
    // @returns: Settings populated with the vendor defaults
    pub fn with_defaults(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        let priority = KNOWN_PROVIDERS
            .iter()
            .position(|p| *p == name)
            .unwrap_or(KNOWN_PROVIDERS.len()) as u32;

        let mut settings = Self {
            name,
            api_key: String::new(),
            priority,
            models: Vec::new(),
            rate_limits: RateLimits::unlimited(),
            model_rate_limits: BTreeMap::new(),
            max_retries: default_max_retries(),
            min_interval_ms: 0,
            base_url: String::new(),
            default_retry_after_secs: default_rate_limit_reset_secs(),
        };

        if let Some(defaults) = vendor_defaults(&settings.name) {
            settings.models = defaults.models.iter().map(|m| m.to_string()).collect();
            settings.rate_limits = defaults.limits;
            settings.min_interval_ms = defaults.min_interval_ms;
            settings.base_url = defaults.base_url.to_string();
        }
        settings
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Endpoint, falling back to the vendor's public one
    pub fn endpoint(&self) -> String {
        if !self.base_url.is_empty() {
            return self.base_url.trim_end_matches('/').to_string();
        }
        vendor_defaults(&self.name)
            .map(|d| d.base_url.to_string())
            .unwrap_or_default()
    }
}

/// How blocks are packed into provider requests
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationMode {
    // @mode: Independent batches, translated concurrently
    #[default]
    Simple,
    // @mode: Batches carry surrounding blocks as reference context
    Context,
}

impl FromStr for TranslationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "context" | "context_aware" | "context-aware" => Ok(Self::Context),
            _ => Err(anyhow!("Invalid translation mode: {}", s)),
        }
    }
}

impl std::fmt::Display for TranslationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Context => write!(f, "context"),
        }
    }
}

/// Translation behaviour shared by all providers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationSettings {
    /// Maximum source characters per dispatched call
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum blocks per batch
    #[serde(default = "default_max_blocks_per_request")]
    pub max_blocks_per_request: usize,

    #[serde(default)]
    pub mode: TranslationMode,

    /// Context blocks on each side in context mode
    #[serde(default = "default_context_window_size")]
    pub context_window_size: usize,

    /// Custom system prompt template
    /// Placeholders: {source_language}, {target_language}
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Base backoff between batch attempts, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Whether formatting tags are preserved (part of the cache key)
    #[serde(default = "default_true")]
    pub preserve_formatting: bool,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_blocks_per_request: default_max_blocks_per_request(),
            mode: TranslationMode::default(),
            context_window_size: default_context_window_size(),
            system_prompt: None,
            temperature: default_temperature(),
            retry_backoff_ms: default_retry_backoff_ms(),
            preserve_formatting: true,
        }
    }
}

/// Dispatcher tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispatchSettings {
    /// Cooldown applied to 429 responses without Retry-After
    #[serde(default = "default_rate_limit_reset_secs")]
    pub rate_limit_reset_secs: u64,

    /// Per-call timeout
    #[serde(default = "default_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Consecutive provider failures that open the circuit
    #[serde(default = "default_circuit_threshold")]
    pub circuit_breaker_threshold: u32,

    /// How long an open circuit stays open
    #[serde(default = "default_circuit_cooldown_secs")]
    pub circuit_breaker_cooldown_secs: u64,

    /// Ledger document location
    #[serde(default)]
    pub rate_limits_file: Option<PathBuf>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            rate_limit_reset_secs: default_rate_limit_reset_secs(),
            provider_timeout_secs: default_timeout_secs(),
            circuit_breaker_threshold: default_circuit_threshold(),
            circuit_breaker_cooldown_secs: default_circuit_cooldown_secs(),
            rate_limits_file: None,
        }
    }
}

/// Translation cache settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default = "default_cache_expiry_days")]
    pub expiry_days: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            expiry_days: default_cache_expiry_days(),
        }
    }
}

/// External speech-to-text command
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranscriptionSettings {
    #[serde(default = "default_whisper_bin")]
    pub whisper_bin: String,

    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,

    /// Hard limit for one transcription run
    #[serde(default = "default_transcription_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            whisper_bin: default_whisper_bin(),
            whisper_model: default_whisper_model(),
            timeout_secs: default_transcription_timeout_secs(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::Error,
            Self::Warn => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
            Self::Trace => LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(anyhow!("Invalid log level: {}", s)),
        }
    }
}

/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Target language code (ISO)
    #[serde(default = "default_target_language")]
    pub target_language: String,

    /// Source language code (ISO), detected by the model when absent
    #[serde(default)]
    pub source_language: Option<String>,

    /// Enabled providers
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,

    #[serde(default)]
    pub translation: TranslationSettings,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub transcription: TranscriptionSettings,

    /// File-level worker cap
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_language: default_target_language(),
            source_language: None,
            providers: Vec::new(),
            translation: TranslationSettings::default(),
            dispatch: DispatchSettings::default(),
            cache: CacheSettings::default(),
            transcription: TranscriptionSettings::default(),
            max_workers: default_max_workers(),
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    /// Load `.env` when present, then read the process environment
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Optional JSON base file, overridden by `.env` and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Ok(env_path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", env_path.display());
        }
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Build from defaults and an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Read a JSON configuration document
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply key/value overrides on top of the current values
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut names: Vec<String> = KNOWN_PROVIDERS.iter().map(|s| s.to_string()).collect();
        for provider in &self.providers {
            if !names.contains(&provider.name) {
                names.push(provider.name.clone());
            }
        }

        for name in names {
            let prefix = name.to_uppercase().replace('-', "_");
            let api_key = get(&format!("{}_API_KEY", prefix));
            let ollama_host = if name == "ollama" { get("OLLAMA_HOST") } else { None };
            let present = self.providers.iter().any(|p| p.name == name);

            if api_key.is_none() && ollama_host.is_none() && !present {
                continue;
            }
            if !present {
                self.providers.push(ProviderSettings::with_defaults(&name));
            }
            let Some(settings) = self.providers.iter_mut().find(|p| p.name == name) else {
                continue;
            };

            if let Some(key) = api_key {
                settings.api_key = key;
            }
            if let Some(host) = ollama_host {
                settings.base_url = host;
            }
            if let Some(models) = get(&format!("{}_MODELS", prefix)) {
                settings.models = split_list(&models);
            }
            if let Some(rpm) = parse_value(&get, &format!("{}_RPM", prefix))? {
                settings.rate_limits.per_minute = Some(rpm);
            }
            if let Some(rpd) = parse_value(&get, &format!("{}_RPD", prefix))? {
                settings.rate_limits.per_day = Some(rpd);
            }
            if let Some(interval) = parse_value(&get, &format!("{}_MIN_INTERVAL_MS", prefix))? {
                settings.min_interval_ms = interval;
            }
            if let Some(url) = get(&format!("{}_BASE_URL", prefix)) {
                settings.base_url = url;
            }
            if let Some(retries) = parse_value(&get, &format!("{}_MAX_RETRIES", prefix))? {
                settings.max_retries = retries;
            }
        }

        if let Some(order) = get("PROVIDER_PRIORITY") {
            let order = split_list(&order.to_lowercase());
            for settings in &mut self.providers {
                settings.priority = match order.iter().position(|n| *n == settings.name) {
                    Some(position) => position as u32,
                    None => order.len() as u32 + settings.priority,
                };
            }
        }

        if let Some(lang) = get("DEFAULT_TARGET_LANG") {
            self.target_language = lang;
        }
        if let Some(lang) = get("SOURCE_LANG") {
            self.source_language = Some(lang);
        }

        let t = &mut self.translation;
        if let Some(v) = parse_value(&get, "TRANSLATION_CHUNK_SIZE")? {
            t.chunk_size = v;
        }
        if let Some(v) = parse_value(&get, "MAX_BLOCKS_PER_REQUEST")? {
            t.max_blocks_per_request = v;
        }
        if let Some(v) = parse_value(&get, "TRANSLATION_MODE")? {
            t.mode = v;
        }
        if let Some(v) = parse_value(&get, "CONTEXT_WINDOW_SIZE")? {
            t.context_window_size = v;
        }
        if let Some(v) = lookup("TRANSLATION_SYSTEM_PROMPT").filter(|v| !v.trim().is_empty()) {
            t.system_prompt = Some(v);
        }

        let d = &mut self.dispatch;
        if let Some(v) = parse_value(&get, "RATE_LIMIT_RESET_TIME")? {
            d.rate_limit_reset_secs = v;
        }
        if let Some(v) = parse_value(&get, "PROVIDER_TIMEOUT_SECS")? {
            d.provider_timeout_secs = v;
        }
        if let Some(v) = parse_value(&get, "CIRCUIT_BREAKER_THRESHOLD")? {
            d.circuit_breaker_threshold = v;
        }
        if let Some(v) = parse_value(&get, "CIRCUIT_BREAKER_COOLDOWN_SECS")? {
            d.circuit_breaker_cooldown_secs = v;
        }
        if let Some(v) = get("RATE_LIMITS_FILE") {
            d.rate_limits_file = Some(PathBuf::from(v));
        }
        let retry_after = d.rate_limit_reset_secs;
        for settings in &mut self.providers {
            settings.default_retry_after_secs = retry_after;
        }

        if let Some(v) = get("CACHE_DIR") {
            self.cache.dir = Some(PathBuf::from(v));
        }
        if let Some(v) = parse_value(&get, "CACHE_EXPIRY_DAYS")? {
            self.cache.expiry_days = v;
        }
        if let Some(v) = parse_value(&get, "CACHE_ENABLED")? {
            self.cache.enabled = v;
        }

        if let Some(v) = parse_value(&get, "MAX_WORKERS")? {
            self.max_workers = v;
        }
        if let Some(v) = parse_value(&get, "LOG_LEVEL")? {
            self.log_level = v;
        }
        if let Some(v) = get("WHISPER_BIN") {
            self.transcription.whisper_bin = v;
        }
        if let Some(v) = get("WHISPER_MODEL") {
            self.transcription.whisper_model = v;
        }

        Ok(())
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self, translating: bool) -> Result<()> {
        crate::language_utils::validate_language_code(&self.target_language)
            .with_context(|| format!("Unknown target language: {}", self.target_language))?;
        if let Some(source) = &self.source_language {
            crate::language_utils::validate_language_code(source)
                .with_context(|| format!("Unknown source language: {}", source))?;
        }
        if self.translation.max_blocks_per_request == 0 {
            return Err(anyhow!("MAX_BLOCKS_PER_REQUEST must be at least 1"));
        }
        if self.translation.chunk_size == 0 {
            return Err(anyhow!("TRANSLATION_CHUNK_SIZE must be at least 1"));
        }
        if translating && self.providers.is_empty() {
            return Err(anyhow!(
                "No translation provider configured; set one of {}",
                KNOWN_PROVIDERS
                    .iter()
                    .map(|p| format!("{}_API_KEY", p.to_uppercase()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        for provider in &self.providers {
            if provider.models.is_empty() {
                return Err(anyhow!("Provider {} has no models configured", provider.name));
            }
            // Ollama accepts a bare host[:port]; the adapter completes it.
            if provider.name != "ollama" && !provider.base_url.is_empty() {
                url::Url::parse(&provider.endpoint())
                    .with_context(|| format!("Invalid base URL for {}: {}", provider.name, provider.base_url))?;
            }
        }
        Ok(())
    }

    /// Providers sorted by priority, then name
    pub fn providers_by_priority(&self) -> Vec<&ProviderSettings> {
        let mut providers: Vec<&ProviderSettings> = self.providers.iter().collect();
        providers.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        providers
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Worker pool size: the configured cap clamped to the CPU count
    pub fn effective_workers(&self) -> usize {
        self.max_workers.clamp(1, num_cpus::get().max(1))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache.dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("subflow")
        })
    }

    pub fn rate_limits_path(&self) -> PathBuf {
        self.dispatch
            .rate_limits_file
            .clone()
            .unwrap_or_else(|| self.cache_dir().join("rate_limits.json"))
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.cache.expiry_days as i64)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_value<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("Invalid value for {}: '{}' ({})", key, raw, e)),
        None => Ok(None),
    }
}

fn default_target_language() -> String {
    "vi".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_chunk_size() -> usize {
    4000
}

fn default_max_blocks_per_request() -> usize {
    10
}

fn default_context_window_size() -> usize {
    3
}

fn default_temperature() -> f32 {
    0.3
}

fn default_retry_backoff_ms() -> u64 {
    1000 // doubled on each retry
}

fn default_true() -> bool {
    true
}

fn default_rate_limit_reset_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_circuit_threshold() -> u32 {
    5
}

fn default_circuit_cooldown_secs() -> u64 {
    180
}

fn default_cache_expiry_days() -> u64 {
    30
}

fn default_max_workers() -> usize {
    4
}

fn default_whisper_bin() -> String {
    "whisper".to_string()
}

fn default_whisper_model() -> String {
    "base".to_string()
}

fn default_transcription_timeout_secs() -> u64 {
    3600
}
