/*!
 * # subflow
 *
 * Subtitle generation and translation with multi-provider LLM dispatch.
 *
 * ## Features
 *
 * - SRT parsing with BOM stripping and Latin-1 fallback, canonical writing
 * - Batch translation with numbered block markers and structural validation
 * - Ordered provider fallback with per-model cooldowns, a circuit breaker
 *   per provider and persisted minute/daily request windows
 * - Content-addressed translation cache with TTL
 * - Idempotent re-runs: finished outputs are skipped, failed blocks retried
 * - Optional transcription of media files through an external command
 *
 * ## Architecture
 *
 * - `app_config`: configuration from JSON, `.env` and the environment
 * - `subtitle_processor`: SRT block model, parser and writer
 * - `providers`: the `Provider` trait, HTTP adapters and the registry
 * - `dispatch`: rate limit ledger, model rotation, provider health, dispatcher
 * - `translation`: markers, prompts, cache, batch translator and file pipeline
 * - `transcription`: media to SRT hand-off
 * - `app_controller`: folder runs with a worker pool
 * - `file_utils`, `language_utils`: helpers
 * - `errors`: error types
 */

#![allow(clippy::uninlined_format_args)]

pub mod app_config;
pub mod app_controller;
pub mod dispatch;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod providers;
pub mod subtitle_processor;
pub mod transcription;
pub mod translation;

pub use app_config::Config;
pub use app_controller::{Controller, RunOptions, RunReport};
pub use dispatch::{ProviderDispatcher, RateLimitLedger};
pub use errors::{AppError, ProviderError, SubtitleError, TranslationError};
pub use language_utils::{get_language_name, language_codes_match, normalize_to_part2t};
pub use subtitle_processor::{SubtitleBlock, SubtitleCollection};
pub use translation::{BatchTranslator, SubtitlePipeline, TranslationCache, TranslationService};
