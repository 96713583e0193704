/*!
 * End-to-end scenarios: files in, files out
 */

use std::fs;
use std::sync::Arc;

use chrono::Utc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use subflow::app_config::RateLimits;
use subflow::dispatch::WindowKind;
use subflow::errors::TranslationError;
use subflow::providers::Provider;
use subflow::providers::mock::{MockProvider, MockReply};
use subflow::providers::openai::OpenAiCompatible;
use subflow::subtitle_processor::{SENTINEL_TRANSLATION, SubtitleCollection};
use subflow::translation::TranslationContext;

use crate::common;

const S1_SOURCE: [&str; 3] = ["Hello world", "This is a test", "Goodbye"];

fn vietnamese_provider(name: &str) -> MockProvider {
    MockProvider::new(name)
        .with_translation("Hello world", "Xin chào thế giới")
        .with_translation("This is a test", "Đây là bài kiểm tra")
        .with_translation("Goodbye", "Tạm biệt")
}

#[tokio::test]
async fn test_pipeline_withThreeBlocks_shouldWriteTranslationsWithOriginalTimings() {
    let temp_dir = common::create_temp_dir();
    let input = common::create_test_file(temp_dir.path(), "movie.srt", &common::srt_from_texts(&S1_SOURCE));
    let output = temp_dir.path().join("movie.vi.srt");
    let provider = Arc::new(vietnamese_provider("mock"));
    let pipeline = common::pipeline(common::provider_settings("mock", 0, &["m"]), provider.clone());

    let summary = pipeline
        .process(&input, &output, &TranslationContext::new("vi"))
        .await
        .unwrap();

    assert_eq!(summary.total_blocks, 3);
    assert_eq!(summary.translated, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(provider.call_count(), 1);

    let bytes = fs::read(&output).unwrap();
    assert!(!bytes.starts_with(&[0xEF, 0xBB, 0xBF]));
    let written = SubtitleCollection::read_file(&output).unwrap();
    let original = SubtitleCollection::read_file(&input).unwrap();
    let texts: Vec<&str> = written.blocks.iter().map(|b| b.source_text.as_str()).collect();
    assert_eq!(texts, vec!["Xin chào thế giới", "Đây là bài kiểm tra", "Tạm biệt"]);
    assert!(written.timings_match(&original));
}

#[tokio::test]
async fn test_pipeline_withMissingEndMarkerTwice_shouldWriteSentinels() {
    let temp_dir = common::create_temp_dir();
    let input = common::create_test_file(temp_dir.path(), "movie.srt", &common::srt_from_texts(&S1_SOURCE));
    let output = temp_dir.path().join("movie.vi.srt");
    let provider = Arc::new(vietnamese_provider("mock").with_default(MockReply::DropEndMarker(2)));
    let pipeline = common::pipeline(common::provider_settings("mock", 0, &["m"]), provider.clone());

    let summary = pipeline
        .process(&input, &output, &TranslationContext::new("vi"))
        .await
        .unwrap();

    assert_eq!(provider.call_count(), 2);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.translated, 0);

    let content = fs::read_to_string(&output).unwrap();
    assert_eq!(content.matches(SENTINEL_TRANSLATION).count(), 3);
    assert!(content.starts_with("1\n00:00:01,000 --> 00:00:01,800\n"));
    assert!(content.contains("3\n00:00:03,000 --> 00:00:03,800\n"));
}

#[tokio::test]
async fn test_dispatch_withRetryAfter429_shouldFallBackAndCoolDownModel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .expect(1)
        .mount(&server)
        .await;

    let a = Arc::new(OpenAiCompatible::new("a", "key", server.uri()));
    let b = Arc::new(MockProvider::new("b").with_translation("Hello", "Xin chào"));
    let mut settings_b = common::provider_settings("b", 1, &["small"]);
    settings_b.rate_limits = RateLimits::new(Some(10), None);
    let dispatcher = common::dispatcher(vec![
        (common::provider_settings("a", 0, &["gpt"]), a as Arc<dyn Provider>),
        (settings_b, b.clone() as Arc<dyn Provider>),
    ]);

    let before = Utc::now();
    let outcome = dispatcher.dispatch("Hello", &TranslationContext::new("vi")).await.unwrap();

    assert_eq!(outcome.text, "Xin chào");
    assert_eq!(outcome.provider, "b");

    let cooldown = dispatcher.model_state("a", "gpt").unwrap().cooldown_until.unwrap();
    let seconds = (cooldown - before).num_seconds();
    assert!((29..=31).contains(&seconds), "cooldown was {}s", seconds);

    let windows = dispatcher.ledger().windows("b", "small").unwrap();
    assert_eq!(windows[&WindowKind::Minute].count, 1);
}

#[tokio::test]
async fn test_dispatch_withMinuteLimitReached_shouldFallBackToNextProvider() {
    let p = Arc::new(MockProvider::new("p"));
    let q = Arc::new(MockProvider::new("q"));
    let mut settings_p = common::provider_settings("p", 0, &["m"]);
    // Daily ceiling equal to the minute one keeps the test stable across a minute boundary.
    settings_p.rate_limits = RateLimits::new(Some(5), Some(5));
    let dispatcher = common::dispatcher(vec![
        (settings_p, p.clone() as Arc<dyn Provider>),
        (common::provider_settings("q", 1, &["m"]), q.clone() as Arc<dyn Provider>),
    ]);
    let context = TranslationContext::new("vi");

    let mut providers = Vec::new();
    for i in 0..6 {
        let outcome = dispatcher.dispatch(&format!("text {}", i), &context).await.unwrap();
        providers.push(outcome.provider);
    }

    assert_eq!(providers, vec!["p", "p", "p", "p", "p", "q"]);
    assert_eq!(p.call_count(), 5);
    assert_eq!(q.call_count(), 1);
    assert!(!dispatcher.ledger().may_use("p", "m"));
}

#[tokio::test]
async fn test_dispatch_withMinuteLimitReachedAndNoFallback_shouldFail() {
    let p = Arc::new(MockProvider::new("p"));
    let mut settings_p = common::provider_settings("p", 0, &["m"]);
    settings_p.rate_limits = RateLimits::new(Some(5), Some(5));
    let dispatcher = common::dispatcher(vec![(settings_p, p.clone() as Arc<dyn Provider>)]);
    let context = TranslationContext::new("vi");

    for i in 0..5 {
        dispatcher.dispatch(&format!("text {}", i), &context).await.unwrap();
    }
    let error = dispatcher.dispatch("text 5", &context).await.unwrap_err();

    assert!(matches!(error, TranslationError::NoProviderAvailable(_)));
    assert_eq!(p.call_count(), 5);
}

#[tokio::test]
async fn test_translate_withSameRequestTwice_shouldServeSecondFromCache() {
    let g = Arc::new(MockProvider::new("g").with_translation("Hello", "Xin chào"));
    let other = Arc::new(MockProvider::new("other"));
    let service = common::service(common::dispatcher(vec![
        (common::provider_settings("other", 0, &["m"]), other.clone() as Arc<dyn Provider>),
        (common::provider_settings("g", 1, &["m"]), g.clone() as Arc<dyn Provider>),
    ]));
    let context = TranslationContext::new("vi").with_preferred_provider(Some("g".to_string()));

    let first = service.translate("Hello", &context).await.unwrap();
    let second = service.translate("Hello", &context).await.unwrap();

    assert_eq!(first, "Xin chào");
    assert_eq!(second, "Xin chào");
    assert_eq!(g.call_count(), 1);
    assert_eq!(other.call_count(), 0);
    assert_eq!(service.cache().stats().hits, 1);
}

#[tokio::test]
async fn test_pipeline_withCompleteOutput_shouldSkipAndLeaveFileUntouched() {
    let temp_dir = common::create_temp_dir();
    let input = common::create_test_file(temp_dir.path(), "movie.srt", &common::srt_from_texts(&S1_SOURCE));
    let output = temp_dir.path().join("movie.vi.srt");
    let provider = Arc::new(vietnamese_provider("mock"));
    let pipeline = common::pipeline(common::provider_settings("mock", 0, &["m"]), provider.clone());
    let context = TranslationContext::new("vi");

    pipeline.process(&input, &output, &context).await.unwrap();
    let before = fs::read(&output).unwrap();
    let modified = fs::metadata(&output).unwrap().modified().unwrap();

    let summary = pipeline.process(&input, &output, &context).await.unwrap();

    assert!(summary.skipped);
    assert_eq!(summary.translated, 0);
    assert_eq!(summary.failed, 0);
    assert_eq!(provider.call_count(), 1);
    assert_eq!(fs::read(&output).unwrap(), before);
    assert_eq!(fs::metadata(&output).unwrap().modified().unwrap(), modified);
}

#[tokio::test]
async fn test_pipeline_withSentinelsInOutput_shouldRetryOnlyFailedBlocks() {
    let temp_dir = common::create_temp_dir();
    let input = common::create_test_file(temp_dir.path(), "movie.srt", &common::srt_from_texts(&S1_SOURCE));
    let output = common::create_test_file(
        temp_dir.path(),
        "movie.vi.srt",
        &common::srt_from_texts(&["Xin chào thế giới", SENTINEL_TRANSLATION, "Tạm biệt"]),
    );
    let provider = Arc::new(vietnamese_provider("mock"));
    let pipeline = common::pipeline(common::provider_settings("mock", 0, &["m"]), provider.clone());

    let summary = pipeline
        .process(&input, &output, &TranslationContext::new("vi"))
        .await
        .unwrap();

    assert_eq!(summary.reused, 2);
    assert_eq!(summary.translated, 1);
    assert_eq!(provider.call_count(), 1);
    let request = &provider.requests()[0];
    assert!(request.text.contains("This is a test"));
    assert!(!request.text.contains("Goodbye"));

    let written = SubtitleCollection::read_file(&output).unwrap();
    assert_eq!(written.blocks[1].source_text, "Đây là bài kiểm tra");
    assert_eq!(written.sentinel_count(), 0);
}

#[tokio::test]
async fn test_pipeline_withMisalignedOutput_shouldTranslateFromScratch() {
    let temp_dir = common::create_temp_dir();
    let input = common::create_test_file(temp_dir.path(), "movie.srt", &common::srt_from_texts(&S1_SOURCE));
    let output = common::create_test_file(
        temp_dir.path(),
        "movie.vi.srt",
        &common::srt_from_texts(&["stale", "output"]),
    );
    let provider = Arc::new(vietnamese_provider("mock"));
    let pipeline = common::pipeline(common::provider_settings("mock", 0, &["m"]), provider.clone());

    let summary = pipeline
        .process(&input, &output, &TranslationContext::new("vi"))
        .await
        .unwrap();

    assert!(!summary.skipped);
    assert_eq!(summary.reused, 0);
    assert_eq!(summary.translated, 3);
    assert_eq!(SubtitleCollection::read_file(&output).unwrap().blocks.len(), 3);
}

#[tokio::test]
async fn test_pipeline_withUnreadableInput_shouldReturnError() {
    let temp_dir = common::create_temp_dir();
    let input = common::create_test_file(temp_dir.path(), "empty.srt", "");
    let provider = Arc::new(MockProvider::new("mock"));
    let pipeline = common::pipeline(common::provider_settings("mock", 0, &["m"]), provider.clone());

    let result = pipeline
        .process(&input, &temp_dir.path().join("empty.vi.srt"), &TranslationContext::new("vi"))
        .await;

    assert!(result.is_err());
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_pipeline_withBlankLineInTranslation_shouldWriteReadableBlocks() {
    let temp_dir = common::create_temp_dir();
    let input = common::create_test_file(temp_dir.path(), "movie.srt", &common::srt_from_texts(&S1_SOURCE));
    let output = temp_dir.path().join("movie.vi.srt");
    let provider = Arc::new(
        vietnamese_provider("mock").with_translation("Hello world", "Xin chào\n\nthế giới"),
    );
    let pipeline = common::pipeline(common::provider_settings("mock", 0, &["m"]), provider.clone());
    let context = TranslationContext::new("vi");

    pipeline.process(&input, &output, &context).await.unwrap();

    let written = SubtitleCollection::read_file(&output).unwrap();
    assert_eq!(written.blocks.len(), 3);
    assert_eq!(written.blocks[0].source_text, "Xin chào\nthế giới");
    assert_eq!(written.blocks[1].source_text, "Đây là bài kiểm tra");

    let again = pipeline.process(&input, &output, &context).await.unwrap();
    assert!(again.skipped);
    assert_eq!(provider.call_count(), 1);
}
