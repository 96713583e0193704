/*!
 * Per-file subtitle pipeline: read, translate, write.
 *
 * Re-runs are cheap. An existing output with the same timings and no
 * sentinel blocks means the file is done and is skipped. An existing output
 * with sentinel blocks keeps its good blocks (matched by position) and only
 * the sentinel blocks are sent again.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use serde::Serialize;

use crate::errors::AppError;
use crate::subtitle_processor::SubtitleCollection;
use crate::translation::batch::BatchTranslator;
use crate::translation::context::TranslationContext;

/// Outcome of one file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessSummary {
    pub input: PathBuf,
    pub output: PathBuf,
    pub total_blocks: usize,
    /// Blocks translated over the network in this run
    pub translated: usize,
    pub cache_hits: usize,
    /// Blocks carried over from an earlier output
    pub reused: usize,
    pub failed: usize,
    /// Failed blocks no provider could translate
    pub provider_failed: usize,
    /// Output was already complete
    pub skipped: bool,
    pub elapsed_secs: f64,
}

impl ProcessSummary {
    /// Nothing in this run got translated because every provider failed
    pub fn is_unavailable(&self) -> bool {
        self.failed > 0
            && self.provider_failed == self.failed
            && self.translated == 0
            && self.cache_hits == 0
    }
}

/// Translates one subtitle file at a time
pub struct SubtitlePipeline {
    translator: Arc<BatchTranslator>,
}

impl SubtitlePipeline {
    pub fn new(translator: Arc<BatchTranslator>) -> Self {
        Self { translator }
    }

    pub fn translator(&self) -> &Arc<BatchTranslator> {
        &self.translator
    }

    /// Translate `input` into `output`
    pub async fn process(
        &self,
        input: &Path,
        output: &Path,
        context: &TranslationContext,
    ) -> Result<ProcessSummary, AppError> {
        let started = Instant::now();
        let mut collection = SubtitleCollection::read_file(input)?;
        let mut summary = ProcessSummary {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            total_blocks: collection.blocks.len(),
            ..Default::default()
        };

        if let Some(previous) = Self::previous_output(output) {
            if !previous.timings_match(&collection) {
                warn!(
                    "{} does not line up with {}, translating from scratch",
                    output.display(),
                    input.display()
                );
            } else if previous.sentinel_count() == 0 {
                info!("Skipping {}: {} is complete", input.display(), output.display());
                summary.skipped = true;
                summary.elapsed_secs = started.elapsed().as_secs_f64();
                return Ok(summary);
            } else {
                for (block, done) in collection.blocks.iter_mut().zip(&previous.blocks) {
                    if !done.is_sentinel() {
                        block.set_translation(&done.source_text);
                        summary.reused += 1;
                    }
                }
                info!(
                    "Resuming {}: {} blocks kept, {} to retry",
                    input.display(),
                    summary.reused,
                    previous.sentinel_count()
                );
            }
        }

        let report = self
            .translator
            .translate_blocks(std::mem::take(&mut collection.blocks), context)
            .await?;
        collection.blocks = report.blocks;
        collection.write_to_srt(output)?;

        summary.translated = report.translated;
        summary.cache_hits = report.cache_hits;
        summary.failed = report.failed;
        summary.provider_failed = report.provider_failed;
        summary.elapsed_secs = started.elapsed().as_secs_f64();

        if summary.failed > 0 {
            warn!(
                "{}: {} of {} blocks failed and carry the error sentinel",
                output.display(),
                summary.failed,
                summary.total_blocks
            );
        } else {
            info!(
                "{} written ({} translated, {} cached) in {:.1}s",
                output.display(),
                summary.translated,
                summary.cache_hits,
                summary.elapsed_secs
            );
        }
        Ok(summary)
    }

    // An unreadable or empty previous output counts as absent.
    fn previous_output(output: &Path) -> Option<SubtitleCollection> {
        if !output.exists() {
            return None;
        }
        match SubtitleCollection::read_file(output) {
            Ok(previous) => Some(previous),
            Err(e) => {
                debug!("Ignoring previous output {}: {}", output.display(), e);
                None
            }
        }
    }
}
