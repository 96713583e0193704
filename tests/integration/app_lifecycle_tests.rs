/*!
 * Folder runs through the controller
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use subflow::app_config::Config;
use subflow::app_controller::{Controller, RunOptions};
use subflow::dispatch::CountingMetrics;
use subflow::errors::ProviderError;
use subflow::providers::Provider;
use subflow::providers::mock::{MockProvider, MockReply};
use subflow::subtitle_processor::SubtitleCollection;
use subflow::transcription::Transcriber;
use subflow::translation::TranslationCache;

use crate::common;

/// Writes a fixed one-block SRT next to the media file
#[derive(Default)]
struct FakeTranscriber {
    seen: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, media: &Path, _language: Option<&str>) -> Result<PathBuf> {
        self.seen.lock().push(media.to_path_buf());
        let srt = media.with_extension("srt");
        fs::write(&srt, common::srt_from_texts(&["Transcribed line"]))?;
        Ok(srt)
    }
}

fn test_config() -> Config {
    let mut config = common::config_from(&[("DEFAULT_TARGET_LANG", "vi")]);
    config.translation.retry_backoff_ms = 0;
    config.max_workers = 2;
    config
}

fn controller(provider: Arc<MockProvider>) -> Controller {
    let dispatcher = common::dispatcher(vec![(
        common::provider_settings(provider.name(), 0, &["m"]),
        provider.clone() as Arc<dyn Provider>,
    )]);
    Controller::with_dispatcher(
        test_config(),
        dispatcher,
        TranslationCache::in_memory(chrono::Duration::days(1)),
        Arc::new(CountingMetrics::new()),
    )
}

#[tokio::test]
async fn test_run_withFolder_shouldTranslateEverySubtitleFile() {
    let temp_dir = common::create_temp_dir();
    let root = temp_dir.path();
    fs::create_dir_all(root.join("season1")).unwrap();
    common::create_test_file(root, "movie.srt", &common::srt_from_texts(&["Hello", "World"]));
    common::create_test_file(&root.join("season1"), "ep01.srt", &common::srt_from_texts(&["Bye"]));
    let controller = controller(Arc::new(MockProvider::new("mock")));

    let report = controller.run(&RunOptions::translate(root)).await.unwrap();

    assert_eq!(report.files.len(), 2);
    assert!(report.errors.is_empty());
    assert_eq!(report.exit_code(), 0);
    assert!(root.join("movie.vi.srt").exists());
    assert!(root.join("season1/ep01.vi.srt").exists());

    let written = SubtitleCollection::read_file(root.join("movie.vi.srt")).unwrap();
    assert_eq!(written.blocks[0].source_text, "[mock] Hello");
    assert!(controller.metrics().snapshot().cache_misses >= 3);
}

#[tokio::test]
async fn test_run_twice_shouldSkipFinishedFiles() {
    let temp_dir = common::create_temp_dir();
    let root = temp_dir.path();
    common::create_test_file(root, "movie.srt", &common::srt_from_texts(&["Hello"]));
    let provider = Arc::new(MockProvider::new("mock"));
    let controller = controller(provider.clone());

    controller.run(&RunOptions::translate(root)).await.unwrap();
    let second = controller.run(&RunOptions::translate(root)).await.unwrap();

    assert_eq!(second.files.len(), 1);
    assert_eq!(second.skipped(), 1);
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn test_run_withOutputDir_shouldWriteThere() {
    let temp_dir = common::create_temp_dir();
    let input = common::create_test_file(temp_dir.path(), "movie.srt", &common::srt_from_texts(&["Hello"]));
    let out_dir = temp_dir.path().join("out");
    let controller = controller(Arc::new(MockProvider::new("mock")));

    let options = RunOptions {
        output_dir: Some(out_dir.clone()),
        ..RunOptions::translate(&input)
    };
    let report = controller.run(&options).await.unwrap();

    assert_eq!(report.files[0].output, out_dir.join("movie.vi.srt"));
    assert!(out_dir.join("movie.vi.srt").exists());
    assert!(!temp_dir.path().join("movie.vi.srt").exists());
}

#[tokio::test]
async fn test_run_withGenerate_shouldTranscribeThenTranslate() {
    let temp_dir = common::create_temp_dir();
    let root = temp_dir.path();
    common::create_test_file(root, "clip.mp4", "not really a video");
    common::create_test_file(root, "done.mp4", "");
    common::create_test_file(root, "done.srt", &common::srt_from_texts(&["Already here"]));
    let transcriber = Arc::new(FakeTranscriber::default());
    let controller = controller(Arc::new(MockProvider::new("mock"))).with_transcriber(transcriber.clone());

    let options = RunOptions {
        generate: true,
        ..RunOptions::translate(root)
    };
    let report = controller.run(&options).await.unwrap();

    assert_eq!(*transcriber.seen.lock(), vec![root.join("clip.mp4")]);
    assert_eq!(report.transcribed, vec![root.join("clip.srt")]);
    assert_eq!(report.files.len(), 2);
    assert!(root.join("clip.vi.srt").exists());
    assert!(root.join("done.vi.srt").exists());
}

#[tokio::test]
async fn test_run_withEveryProviderDown_shouldExitWithFailure() {
    let temp_dir = common::create_temp_dir();
    let root = temp_dir.path();
    common::create_test_file(root, "movie.srt", &common::srt_from_texts(&["Hello", "World"]));
    let provider = Arc::new(MockProvider::failing("down", ProviderError::Transient("HTTP 500".into())));
    let controller = controller(provider);

    let report = controller.run(&RunOptions::translate(root)).await.unwrap();

    assert_eq!(report.failed_blocks(), 2);
    assert!(report.files[0].is_unavailable());
    assert_eq!(report.exit_code(), 1);
    let written = SubtitleCollection::read_file(root.join("movie.vi.srt")).unwrap();
    assert_eq!(written.sentinel_count(), 2);
}

#[tokio::test]
async fn test_run_withSomeBlocksFailing_shouldExitWithPartialCode() {
    let temp_dir = common::create_temp_dir();
    let root = temp_dir.path();
    common::create_test_file(root, "good.srt", &common::srt_from_texts(&["Hello"]));
    common::create_test_file(root, "movie.srt", &common::srt_from_texts(&["Broken", "Markers"]));
    // Every reply loses block 2's end marker; one-block batches still decode.
    let provider = Arc::new(MockProvider::new("mock").with_default(MockReply::DropEndMarker(2)));
    let controller = controller(provider);

    let report = controller.run(&RunOptions::translate(root)).await.unwrap();

    assert!(report.errors.is_empty());
    assert_eq!(report.failed_blocks(), 2);
    assert!(report.files.iter().all(|f| !f.is_unavailable()));
    assert_eq!(report.exit_code(), 2);
}

#[tokio::test]
async fn test_run_withBrokenFile_shouldReportErrorAndContinue() {
    let temp_dir = common::create_temp_dir();
    let root = temp_dir.path();
    common::create_test_file(root, "broken.srt", "no subtitles in here\n");
    common::create_test_file(root, "good.srt", &common::srt_from_texts(&["Hello"]));
    let controller = controller(Arc::new(MockProvider::new("mock")));

    let report = controller.run(&RunOptions::translate(root)).await.unwrap();

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].0, root.join("broken.srt"));
    assert_eq!(report.files.len(), 1);
    assert_eq!(report.exit_code(), 1);
    assert!(root.join("good.vi.srt").exists());
}

#[tokio::test]
async fn test_run_withMissingInput_shouldFail() {
    let temp_dir = common::create_temp_dir();
    let controller = controller(Arc::new(MockProvider::new("mock")));

    let result = controller.run(&RunOptions::translate(temp_dir.path().join("nope"))).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_run_withCancelledFlag_shouldNotCallProvider() {
    let temp_dir = common::create_temp_dir();
    let root = temp_dir.path();
    common::create_test_file(root, "movie.srt", &common::srt_from_texts(&["Hello"]));
    let provider = Arc::new(MockProvider::new("mock"));
    let controller = controller(provider.clone());
    controller.cancel_flag().cancel();

    let report = controller.run(&RunOptions::translate(root)).await.unwrap();

    assert_eq!(provider.call_count(), 0);
    assert_eq!(report.errors.len(), 1);
    assert!(!root.join("movie.vi.srt").exists());
}
