/*!
 * Subtitle translation.
 *
 * - `markers`: numbered block markers for batch payloads
 * - `prompts`: system prompt templates
 * - `context`: per-request context and reference windows
 * - `cache`: content-addressed translation cache
 * - `core`: cache-fronted dispatch with chunking
 * - `batch`: batch planning, retries and sentinels
 * - `pipeline`: per-file read, translate and write
 */

pub use self::batch::{BatchOptions, BatchReport, BatchTranslator, CancelFlag};
pub use self::cache::{CacheStats, TranslationCache};
pub use self::context::TranslationContext;
pub use self::core::TranslationService;
pub use self::pipeline::{ProcessSummary, SubtitlePipeline};
pub use self::prompts::PromptTemplate;

pub mod batch;
pub mod cache;
pub mod context;
pub mod core;
pub mod markers;
pub mod pipeline;
pub mod prompts;
