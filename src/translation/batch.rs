/*!
 * Batch translation of subtitle blocks.
 *
 * Blocks are first looked up in the cache one by one. The remaining blocks
 * are grouped into batches of at most `max_blocks_per_request` blocks whose
 * combined source text stays within `chunk_size`, encoded with numbered
 * markers and dispatched:
 *
 * - simple mode runs batches concurrently, bounded by a semaphore shared by
 *   every file using this translator
 * - context mode runs batches in order so each batch sees the translations
 *   of the blocks before it
 *
 * A batch that fails to dispatch or decode is retried once after a backoff.
 * Blocks of a batch that fails again get the sentinel translation so the
 * output keeps its alignment.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio::sync::Semaphore;

use crate::app_config::Config;
use crate::errors::TranslationError;
use crate::subtitle_processor::{BlockStatus, SubtitleBlock};
use crate::translation::context::{ContextWindow, TranslationContext, encode_with_context};
use crate::translation::core::TranslationService;
use crate::translation::markers;

/// Share of pending blocks served from cache at or above which misses are packed densely
pub const CACHE_COVERAGE_THRESHOLD: f64 = 0.8;

/// Attempts per batch: the first try plus one retry
const MAX_BATCH_ATTEMPTS: u32 = 2;

/// Shared cancel signal, checked before each batch is dispatched
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Batch sizing and retry policy
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_blocks_per_request: usize,
    pub chunk_size: usize,
    /// Base delay; the retry after attempt `n` waits `retry_backoff * 2^n`
    pub retry_backoff: Duration,
    /// Concurrent batches in simple mode
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_blocks_per_request: 10,
            chunk_size: 4000,
            retry_backoff: Duration::from_millis(1000),
            concurrency: 4,
        }
    }
}

impl BatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_blocks_per_request: config.translation.max_blocks_per_request.max(1),
            chunk_size: config.translation.chunk_size.max(1),
            retry_backoff: Duration::from_millis(config.translation.retry_backoff_ms),
            concurrency: config.effective_workers().max(1),
        }
    }
}

/// Result of translating one file's blocks
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Same length and order as the input
    pub blocks: Vec<SubtitleBlock>,
    /// Blocks served from cache
    pub cache_hits: usize,
    /// Blocks translated over the network
    pub translated: usize,
    /// Blocks left with the sentinel
    pub failed: usize,
    /// Failed blocks whose last error came from the provider layer
    pub provider_failed: usize,
    /// Batches sent to the dispatcher
    pub batches: usize,
}

// Positions of the blocks in one batch and their source texts.
struct PlannedBatch {
    positions: Vec<usize>,
    texts: Vec<String>,
}

/// Translates the blocks of a file through the service
pub struct BatchTranslator {
    service: Arc<TranslationService>,
    options: BatchOptions,
    semaphore: Arc<Semaphore>,
    cancel: CancelFlag,
}

impl BatchTranslator {
    pub fn new(service: Arc<TranslationService>, options: BatchOptions) -> Self {
        let permits = options.concurrency.max(1);
        Self {
            service,
            options,
            semaphore: Arc::new(Semaphore::new(permits)),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn service(&self) -> &Arc<TranslationService> {
        &self.service
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Translate every block that still needs it; translated blocks are left untouched
    pub async fn translate_blocks(
        &self,
        mut blocks: Vec<SubtitleBlock>,
        context: &TranslationContext,
    ) -> Result<BatchReport, TranslationError> {
        let pending: Vec<usize> = (0..blocks.len()).filter(|&i| blocks[i].needs_translation()).collect();
        let mut report = BatchReport {
            blocks: Vec::new(),
            cache_hits: 0,
            translated: 0,
            failed: 0,
            provider_failed: 0,
            batches: 0,
        };
        if pending.is_empty() {
            report.blocks = blocks;
            return Ok(report);
        }

        let mut misses = Vec::new();
        for &i in &pending {
            match self.service.cached(&blocks[i].source_text, context) {
                Some(hit) => {
                    blocks[i].set_translation(hit);
                    report.cache_hits += 1;
                }
                None => misses.push(i),
            }
        }

        let coverage = report.cache_hits as f64 / pending.len() as f64;
        debug!(
            "{} of {} pending blocks from cache ({:.0}%)",
            report.cache_hits,
            pending.len(),
            coverage * 100.0
        );
        if misses.is_empty() {
            report.blocks = blocks;
            return Ok(report);
        }

        let batches = self.plan_batches(&blocks, &pending, &misses, coverage >= CACHE_COVERAGE_THRESHOLD);
        report.batches = batches.len();
        info!(
            "Translating {} blocks in {} batch(es) ({} mode)",
            misses.len(),
            batches.len(),
            context.mode
        );

        let outcome = if context.is_context_aware() {
            self.run_sequential(&mut blocks, batches, context, &mut report).await
        } else {
            self.run_concurrent(&mut blocks, batches, context, &mut report).await
        };

        if report.failed > 0 {
            self.service.metrics().blocks_failed(report.failed);
        }
        outcome?;
        report.blocks = blocks;
        Ok(report)
    }

    /// Group misses into batches.
    ///
    /// With high cache coverage the misses are packed back to back; otherwise
    /// each window of `max_blocks_per_request` pending blocks sends its misses
    /// together so batches keep following the file layout.
    fn plan_batches(
        &self,
        blocks: &[SubtitleBlock],
        pending: &[usize],
        misses: &[usize],
        dense: bool,
    ) -> Vec<PlannedBatch> {
        let max_blocks = self.options.max_blocks_per_request.max(1);
        let groups: Vec<Vec<usize>> = if dense {
            misses.chunks(max_blocks).map(<[usize]>::to_vec).collect()
        } else {
            pending
                .chunks(max_blocks)
                .map(|window| window.iter().copied().filter(|i| misses.contains(i)).collect::<Vec<_>>())
                .filter(|group| !group.is_empty())
                .collect()
        };

        let mut batches = Vec::new();
        for group in groups {
            let mut current = PlannedBatch {
                positions: Vec::new(),
                texts: Vec::new(),
            };
            let mut chars = 0;
            for i in group {
                let text = blocks[i].source_text.clone();
                let len = text.chars().count();
                if !current.positions.is_empty() && chars + len > self.options.chunk_size {
                    batches.push(std::mem::replace(
                        &mut current,
                        PlannedBatch {
                            positions: Vec::new(),
                            texts: Vec::new(),
                        },
                    ));
                    chars = 0;
                }
                chars += len;
                current.positions.push(i);
                current.texts.push(text);
            }
            if !current.positions.is_empty() {
                batches.push(current);
            }
        }
        batches
    }

    async fn run_concurrent(
        &self,
        blocks: &mut [SubtitleBlock],
        batches: Vec<PlannedBatch>,
        context: &TranslationContext,
        report: &mut BatchReport,
    ) -> Result<(), TranslationError> {
        let concurrency = self.options.concurrency.max(1);
        let results: Vec<(Vec<usize>, Vec<String>, Result<Vec<String>, TranslationError>)> =
            stream::iter(batches)
                .map(|batch| async move {
                    let result = match self.semaphore.acquire().await {
                        Ok(_permit) => self.translate_batch(&batch.texts, None, context).await,
                        Err(_) => Err(TranslationError::Cancelled),
                    };
                    (batch.positions, batch.texts, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let mut cancelled = false;
        for (positions, texts, result) in results {
            match result {
                Err(TranslationError::Cancelled) => cancelled = true,
                other => self.apply(blocks, &positions, &texts, other, context, report),
            }
        }
        if cancelled {
            return Err(TranslationError::Cancelled);
        }
        Ok(())
    }

    async fn run_sequential(
        &self,
        blocks: &mut [SubtitleBlock],
        batches: Vec<PlannedBatch>,
        context: &TranslationContext,
        report: &mut BatchReport,
    ) -> Result<(), TranslationError> {
        for batch in batches {
            let (Some(&first), Some(&last)) = (batch.positions.first(), batch.positions.last()) else {
                continue;
            };
            let window = ContextWindow::around(blocks, first, last + 1, context.context_window_size);
            let result = {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| TranslationError::Cancelled)?;
                self.translate_batch(&batch.texts, Some(&window), context).await
            };
            if matches!(result, Err(TranslationError::Cancelled)) {
                return Err(TranslationError::Cancelled);
            }
            self.apply(blocks, &batch.positions, &batch.texts, result, context, report);
        }
        Ok(())
    }

    /// Dispatch and decode one batch, retrying once
    async fn translate_batch(
        &self,
        texts: &[String],
        window: Option<&ContextWindow>,
        context: &TranslationContext,
    ) -> Result<Vec<String>, TranslationError> {
        let payload = match window {
            Some(window) => encode_with_context(window, texts),
            None => markers::encode_batch(texts),
        };

        let mut last_error = TranslationError::Cancelled;
        for attempt in 0..MAX_BATCH_ATTEMPTS {
            if attempt > 0 {
                let delay = self.options.retry_backoff * 2u32.pow(attempt);
                debug!("Retrying batch of {} after {:?}", texts.len(), delay);
                tokio::time::sleep(delay).await;
            }
            if self.cancel.is_cancelled() {
                return Err(TranslationError::Cancelled);
            }

            let result = self
                .service
                .dispatch_payload(&payload, context)
                .await
                .and_then(|outcome| markers::decode_batch(&outcome.text, texts.len()));
            match result {
                Ok(translations) => return Ok(translations),
                Err(e) => {
                    warn!("Batch of {} blocks failed (attempt {}): {}", texts.len(), attempt + 1, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    fn apply(
        &self,
        blocks: &mut [SubtitleBlock],
        positions: &[usize],
        texts: &[String],
        result: Result<Vec<String>, TranslationError>,
        context: &TranslationContext,
        report: &mut BatchReport,
    ) {
        match result {
            Ok(translations) => {
                for ((&i, source), translation) in positions.iter().zip(texts).zip(translations) {
                    self.service.store(source, context, &translation);
                    blocks[i].set_translation(translation);
                    report.translated += 1;
                }
            }
            Err(error) => {
                let status = match error {
                    TranslationError::StructureMismatch(_) => BlockStatus::FailedStructure,
                    _ => BlockStatus::FailedProvider,
                };
                for &i in positions {
                    blocks[i].mark_failed(status);
                }
                report.failed += positions.len();
                if status == BlockStatus::FailedProvider {
                    report.provider_failed += positions.len();
                }
            }
        }
    }
}
