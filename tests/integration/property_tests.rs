/*!
 * Invariants that hold for any input
 */

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use subflow::app_config::RateLimits;
use subflow::dispatch::{LimitTable, RateLimitLedger};
use subflow::errors::ProviderError;
use subflow::providers::Provider;
use subflow::providers::mock::{MockProvider, MockReply};
use subflow::subtitle_processor::{SubtitleBlock, SubtitleCollection};
use subflow::translation::TranslationContext;
use subflow::translation::markers;

use crate::common;

/// Small deterministic generator so runs are reproducible
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

const SAMPLE_TEXTS: [&str; 10] = [
    "Hello",
    "Two\nlines",
    "Ünïcödé • ✓",
    "<i>styled</i>",
    "1, 2, 3 -- 4",
    "Quote \"this\"",
    "Tab\tinside",
    "Ending with dots...",
    "Numbers 00:00:01,000",
    "Last one",
];

#[tokio::test]
async fn test_pipeline_withIrregularInput_shouldPreserveStructureAndRenumber() {
    let temp_dir = common::create_temp_dir();
    let content = "3\n00:00:01,000 --> 00:00:02,000\nFirst\n\n7\n00:00:02,500 --> 00:00:04,000\nSecond\nline two\n\n10\n01:00:00,000 --> 01:00:01,001\nThird\n";
    let input = common::create_test_file(temp_dir.path(), "odd.srt", content);
    let output = temp_dir.path().join("odd.vi.srt");
    let provider = Arc::new(MockProvider::new("mock").then(MockReply::Error(ProviderError::Transient("once".into()))));
    let pipeline = common::pipeline(common::provider_settings("mock", 0, &["m"]), provider);

    pipeline
        .process(&input, &output, &TranslationContext::new("vi"))
        .await
        .unwrap();

    let original = SubtitleCollection::read_file(&input).unwrap();
    let written = SubtitleCollection::read_file(&output).unwrap();
    assert_eq!(written.blocks.len(), original.blocks.len());
    assert!(written.timings_match(&original));
    let indices: Vec<usize> = written.blocks.iter().map(|b| b.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_batch_withEchoingProvider_shouldRoundTripUpToTenTexts() {
    for n in 1..=SAMPLE_TEXTS.len() {
        let texts = &SAMPLE_TEXTS[..n];
        let encoded = markers::encode_batch(texts);
        assert_eq!(markers::decode_batch(&encoded, n).unwrap(), texts.to_vec());

        let provider = Arc::new(MockProvider::new("echo").with_default(MockReply::Echo));
        let translator = common::translator(
            common::service(common::dispatcher(vec![(
                common::provider_settings("echo", 0, &["m"]),
                provider.clone() as Arc<dyn Provider>,
            )])),
            10,
        );
        let blocks: Vec<SubtitleBlock> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| SubtitleBlock::new(i + 1, i as u64 * 1000, i as u64 * 1000 + 500, *text))
            .collect();

        let report = translator
            .translate_blocks(blocks, &TranslationContext::new("vi"))
            .await
            .unwrap();

        let translated: Vec<&str> = report.blocks.iter().map(|b| b.output_text()).collect();
        assert_eq!(translated, texts.to_vec(), "round trip failed for {} texts", n);
        assert_eq!(provider.call_count(), 1);
    }
}

#[test]
fn test_ledger_withRandomOperations_shouldNeverExceedLimits() {
    let mut limits = HashMap::new();
    limits.insert(
        "p".to_string(),
        LimitTable {
            provider: RateLimits::default(),
            default: RateLimits::new(Some(4), Some(25)),
            per_model: [("wide".to_string(), RateLimits::new(Some(9), None))].into_iter().collect(),
        },
    );
    let ledger = RateLimitLedger::in_memory(limits);
    let models = ["narrow", "wide"];
    let mut rng = Lcg(42);
    let mut now = Utc.with_ymd_and_hms(2024, 1, 1, 23, 50, 0).unwrap();

    for _ in 0..2_000 {
        let model = models[rng.below(2) as usize];
        match rng.below(3) {
            0 => {
                ledger.may_use_at("p", model, now);
            }
            _ => ledger.record_use_at("p", model, now),
        }
        now += Duration::seconds(rng.below(7) as i64);

        for windows in ledger.snapshot().values().flat_map(|p| p.models.values()) {
            for counter in windows.values() {
                assert!(counter.count <= counter.limit, "{:?}", counter);
            }
        }
    }
}

#[tokio::test]
async fn test_batch_withSameBlocksTwice_shouldCallProviderOnce() {
    let provider = Arc::new(MockProvider::new("mock"));
    let translator = common::translator(
        common::service(common::dispatcher(vec![(
            common::provider_settings("mock", 0, &["m"]),
            provider.clone() as Arc<dyn Provider>,
        )])),
        10,
    );
    let context = TranslationContext::new("vi");
    let blocks = || {
        vec![
            SubtitleBlock::new(1, 0, 500, "Hello"),
            SubtitleBlock::new(2, 600, 900, "World"),
        ]
    };

    let first = translator.translate_blocks(blocks(), &context).await.unwrap();
    let second = translator.translate_blocks(blocks(), &context).await.unwrap();

    assert_eq!(provider.call_count(), 1);
    assert_eq!(second.cache_hits, 2);
    assert_eq!(second.batches, 0);
    assert_eq!(first.blocks, second.blocks);
}

#[tokio::test]
async fn test_dispatch_withHealthyProviders_shouldTryLowestPriorityFirst() {
    let slow = Arc::new(MockProvider::new("slow"));
    let first = Arc::new(MockProvider::new("first"));
    let middle = Arc::new(MockProvider::new("middle"));
    let dispatcher = common::dispatcher(vec![
        (common::provider_settings("slow", 2, &["m"]), slow.clone() as Arc<dyn Provider>),
        (common::provider_settings("first", 0, &["m"]), first.clone() as Arc<dyn Provider>),
        (common::provider_settings("middle", 1, &["m"]), middle.clone() as Arc<dyn Provider>),
    ]);

    for i in 0..5 {
        let outcome = dispatcher
            .dispatch(&format!("text {}", i), &TranslationContext::new("vi"))
            .await
            .unwrap();
        assert_eq!(outcome.provider, "first");
    }
    assert_eq!(first.call_count(), 5);
    assert_eq!(middle.call_count(), 0);
    assert_eq!(slow.call_count(), 0);
}

#[tokio::test]
async fn test_dispatch_withTransientProvider_shouldReachFallbackWithinRetryBudget() {
    let a = Arc::new(MockProvider::failing("a", ProviderError::Transient("HTTP 502".into())));
    let b = Arc::new(MockProvider::new("b"));
    let settings_a = common::provider_settings("a", 0, &["m"]);
    let budget = settings_a.max_retries + 1;
    let dispatcher = common::dispatcher(vec![
        (settings_a, a.clone() as Arc<dyn Provider>),
        (common::provider_settings("b", 1, &["m"]), b.clone() as Arc<dyn Provider>),
    ]);

    let outcome = dispatcher.dispatch("Hello", &TranslationContext::new("vi")).await.unwrap();

    assert_eq!(outcome.provider, "b");
    assert_eq!(outcome.text, "[b] Hello");
    assert!(outcome.attempts <= budget);
    assert_eq!(a.call_count() + b.call_count(), outcome.attempts as usize);
}

#[tokio::test]
async fn test_pipeline_runTwice_shouldProduceIdenticalOutput() {
    let temp_dir = common::create_temp_dir();
    let inputs = [
        ("a.srt", common::srt_from_texts(&["one", "two", "three"])),
        ("b.srt", common::srt_from_texts(&["four"])),
    ];
    let provider = Arc::new(MockProvider::new("mock"));
    let pipeline = common::pipeline(common::provider_settings("mock", 0, &["m"]), provider.clone());
    let context = TranslationContext::new("vi");

    let mut first_run = Vec::new();
    for (name, content) in &inputs {
        let input = common::create_test_file(temp_dir.path(), name, content);
        let output = input.with_extension("vi.srt");
        pipeline.process(&input, &output, &context).await.unwrap();
        first_run.push((input, output.clone(), fs::read(&output).unwrap()));
    }
    let calls = provider.call_count();

    for (input, output, bytes) in &first_run {
        let summary = pipeline.process(input, output, &context).await.unwrap();
        assert!(summary.skipped);
        assert_eq!(&fs::read(output).unwrap(), bytes);
    }
    assert_eq!(provider.call_count(), calls);
}
