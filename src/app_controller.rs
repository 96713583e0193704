use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};

use crate::app_config::Config;
use crate::dispatch::{CountingMetrics, ProviderDispatcher, RateLimitLedger};
use crate::file_utils::{FileManager, FileType};
use crate::providers::ProviderRegistry;
use crate::transcription::{Transcriber, WhisperCommand};
use crate::translation::{
    BatchOptions, BatchTranslator, CancelFlag, ProcessSummary, SubtitlePipeline, TranslationCache,
    TranslationContext, TranslationService,
};

// @module: Application controller for folder and file runs

/// What one run should do
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Subtitle or media file, or a directory scanned recursively
    pub input: PathBuf,
    /// Output directory; defaults to the directory of each input
    pub output_dir: Option<PathBuf>,
    /// Transcribe media files without a sibling `.srt`
    pub generate: bool,
    /// Translate subtitle inputs
    pub translate: bool,
    /// Provider tried first when eligible
    pub preferred_provider: Option<String>,
}

impl RunOptions {
    pub fn translate(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: None,
            generate: false,
            translate: true,
            preferred_provider: None,
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub files: Vec<ProcessSummary>,
    pub transcribed: Vec<PathBuf>,
    /// Inputs that failed outright, with the reason
    pub errors: Vec<(PathBuf, String)>,
    pub elapsed_secs: f64,
}

impl RunReport {
    pub fn failed_blocks(&self) -> usize {
        self.files.iter().map(|f| f.failed).sum()
    }

    pub fn skipped(&self) -> usize {
        self.files.iter().filter(|f| f.skipped).count()
    }

    /// 0 when everything succeeded, 1 when a file failed or no provider could
    /// translate it, 2 when only some blocks failed
    pub fn exit_code(&self) -> i32 {
        if !self.errors.is_empty() || self.files.iter().any(ProcessSummary::is_unavailable) {
            1
        } else if self.failed_blocks() > 0 {
            2
        } else {
            0
        }
    }
}

/// Main application controller
pub struct Controller {
    // @field: App configuration
    config: Config,
    pipeline: Arc<SubtitlePipeline>,
    transcriber: Arc<dyn Transcriber>,
    metrics: Arc<CountingMetrics>,
}

impl Controller {
    /// Controller wired from configuration: registry, ledger, dispatcher, cache
    pub fn with_config(config: Config) -> Result<Self> {
        let metrics = Arc::new(CountingMetrics::new());
        let ledger = Arc::new(RateLimitLedger::from_config(&config));
        let dispatcher = ProviderDispatcher::from_config(
            &config,
            &ProviderRegistry::with_builtins(),
            ledger,
            metrics.clone(),
        );
        let cache = TranslationCache::from_config(&config);
        Ok(Self::with_dispatcher(config, dispatcher, cache, metrics))
    }

    /// Controller around a prepared dispatcher
    pub fn with_dispatcher(
        config: Config,
        dispatcher: ProviderDispatcher,
        cache: TranslationCache,
        metrics: Arc<CountingMetrics>,
    ) -> Self {
        let service = TranslationService::from_config(&config, Arc::new(dispatcher), cache, metrics.clone());
        let translator = BatchTranslator::new(Arc::new(service), BatchOptions::from_config(&config));
        Self {
            transcriber: Arc::new(WhisperCommand::from_settings(&config.transcription)),
            pipeline: Arc::new(SubtitlePipeline::new(Arc::new(translator))),
            config,
            metrics,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = transcriber;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        self.pipeline.translator().cancel_flag()
    }

    pub fn metrics(&self) -> &Arc<CountingMetrics> {
        &self.metrics
    }

    /// Transcribe and/or translate everything under `options.input`
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport> {
        let started = Instant::now();
        if !options.input.exists() {
            return Err(anyhow!("Input path does not exist: {}", options.input.display()));
        }
        let mut report = RunReport::default();

        if options.generate {
            self.transcribe_inputs(&options.input, &mut report).await?;
        }

        if options.translate {
            let inputs = self.subtitle_inputs(&options.input)?;
            if inputs.is_empty() {
                warn!("No subtitle files found under {}", options.input.display());
            } else {
                self.translate_inputs(inputs, options, &mut report).await;
            }
        }

        report.elapsed_secs = started.elapsed().as_secs_f64();
        let snapshot = self.metrics.snapshot();
        info!(
            "Run finished: {} files, {} skipped, {} errors, {} failed blocks, {} provider calls, {:.1}s",
            report.files.len(),
            report.skipped(),
            report.errors.len(),
            report.failed_blocks(),
            snapshot.total_attempts(),
            report.elapsed_secs
        );
        Ok(report)
    }

    fn subtitle_inputs(&self, input: &Path) -> Result<Vec<PathBuf>> {
        if input.is_dir() {
            return FileManager::find_subtitle_inputs(input);
        }
        match FileManager::detect_file_type(input) {
            FileType::Subtitle => Ok(vec![input.to_path_buf()]),
            FileType::Media if input.with_extension("srt").exists() => Ok(vec![input.with_extension("srt")]),
            _ => Ok(Vec::new()),
        }
    }

    async fn transcribe_inputs(&self, input: &Path, report: &mut RunReport) -> Result<()> {
        let media = if input.is_dir() {
            FileManager::find_untranscribed_media(input)?
        } else if FileManager::detect_file_type(input) == FileType::Media && !input.with_extension("srt").exists() {
            vec![input.to_path_buf()]
        } else {
            Vec::new()
        };

        for file in media {
            if self.cancel_flag().is_cancelled() {
                break;
            }
            match self
                .transcriber
                .transcribe(&file, self.config.source_language.as_deref())
                .await
            {
                Ok(srt) => report.transcribed.push(srt),
                Err(e) => {
                    error!("Transcription failed for {}: {}", file.display(), e);
                    report.errors.push((file, e.to_string()));
                }
            }
        }
        Ok(())
    }

    async fn translate_inputs(&self, inputs: Vec<PathBuf>, options: &RunOptions, report: &mut RunReport) {
        let context = TranslationContext::from_config(&self.config)
            .with_preferred_provider(options.preferred_provider.clone());
        let workers = self.config.effective_workers().min(inputs.len()).max(1);
        info!("Translating {} file(s) with {} worker(s)", inputs.len(), workers);

        let progress = ProgressBar::new(inputs.len() as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress.set_style(style.progress_chars("=>-"));

        let results: Vec<(PathBuf, Result<ProcessSummary, String>)> = stream::iter(inputs)
            .map(|input| {
                let context = &context;
                let progress = &progress;
                async move {
                    let output_dir = match &options.output_dir {
                        Some(dir) => dir.clone(),
                        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
                    };
                    let output = FileManager::generate_output_path(
                        &input,
                        &output_dir,
                        &self.config.target_language,
                        "srt",
                    );
                    let result = self
                        .pipeline
                        .process(&input, &output, context)
                        .await
                        .map_err(|e| e.to_string());
                    if let Some(name) = input.file_name() {
                        progress.set_message(name.to_string_lossy().to_string());
                    }
                    progress.inc(1);
                    (input, result)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;
        progress.finish_and_clear();

        for (input, result) in results {
            match result {
                Ok(summary) => report.files.push(summary),
                Err(message) => {
                    error!("Error processing {}: {}", input.display(), message);
                    report.errors.push((input, message));
                }
            }
        }
        report.files.sort_by(|a, b| a.input.cmp(&b.input));
    }
}
