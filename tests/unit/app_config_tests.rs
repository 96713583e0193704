/*!
 * Tests for configuration loading
 */

use std::path::PathBuf;

use subflow::app_config::{Config, LogLevel, TranslationMode};

use crate::common;

#[test]
fn test_config_default_shouldHaveNoProviders() {
    let config = Config::default();
    assert!(config.providers.is_empty());
    assert_eq!(config.translation.max_blocks_per_request, 10);
    assert_eq!(config.translation.mode, TranslationMode::Simple);
    assert_eq!(config.dispatch.rate_limit_reset_secs, 60);
    assert_eq!(config.log_level, LogLevel::Info);
}

#[test]
fn test_from_lookup_withGeminiKey_shouldUseVendorDefaults() {
    let config = common::config_from(&[("GEMINI_API_KEY", "secret")]);
    let gemini = config.provider("gemini").unwrap();

    assert_eq!(gemini.api_key, "secret");
    assert!(!gemini.models.is_empty());
    assert_eq!(gemini.rate_limits.per_minute, Some(15));
    assert!(gemini.endpoint().starts_with("https://generativelanguage.googleapis.com"));
}

#[test]
fn test_from_lookup_withRateLimitReset_shouldPropagateToProviders() {
    let config = common::config_from(&[("OPENAI_API_KEY", "k"), ("RATE_LIMIT_RESET_TIME", "45")]);
    assert_eq!(config.provider("openai").unwrap().default_retry_after_secs, 45);
}

#[test]
fn test_from_lookup_withCacheAndLedgerPaths_shouldResolvePaths() {
    let config = common::config_from(&[
        ("CACHE_DIR", "/tmp/subflow-test-cache"),
        ("CACHE_EXPIRY_DAYS", "7"),
    ]);
    assert_eq!(config.cache_dir(), PathBuf::from("/tmp/subflow-test-cache"));
    assert_eq!(
        config.rate_limits_path(),
        PathBuf::from("/tmp/subflow-test-cache/rate_limits.json")
    );
    assert_eq!(config.cache_ttl(), chrono::Duration::days(7));

    let config = common::config_from(&[("RATE_LIMITS_FILE", "/tmp/limits.json")]);
    assert_eq!(config.rate_limits_path(), PathBuf::from("/tmp/limits.json"));
}

#[test]
fn test_from_lookup_withInvalidMode_shouldFail() {
    let result = Config::from_lookup(|key| (key == "TRANSLATION_MODE").then(|| "fancy".to_string()));
    assert!(result.is_err());
}

#[test]
fn test_validate_withUnknownTargetLanguage_shouldFail() {
    let mut config = common::config_from(&[("OPENAI_API_KEY", "k")]);
    assert!(config.validate(true).is_ok());

    config.target_language = "xx-not-a-language".to_string();
    assert!(config.validate(true).is_err());
}

#[test]
fn test_validate_withZeroBlocksPerRequest_shouldFail() {
    let mut config = Config::default();
    config.translation.max_blocks_per_request = 0;
    assert!(config.validate(false).is_err());
}

#[test]
fn test_from_file_withPartialJson_shouldFillDefaults() {
    let temp_dir = common::create_temp_dir();
    let path = common::create_test_file(
        temp_dir.path(),
        "config.json",
        r#"{
            "target_language": "fr",
            "providers": [
                { "name": "mistral", "api_key": "m", "priority": 0, "models": ["small"] }
            ],
            "translation": { "mode": "context", "context_window_size": 2 }
        }"#,
    );

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.target_language, "fr");
    assert_eq!(config.translation.mode, TranslationMode::Context);
    assert_eq!(config.translation.context_window_size, 2);
    assert_eq!(config.translation.max_blocks_per_request, 10);
    let mistral = config.provider("mistral").unwrap();
    assert_eq!(mistral.models, vec!["small"]);
    assert_eq!(mistral.max_retries, 3);
}

#[test]
fn test_apply_overrides_onFileConfig_shouldOverrideModels() {
    let temp_dir = common::create_temp_dir();
    let path = common::create_test_file(
        temp_dir.path(),
        "config.json",
        r#"{ "providers": [ { "name": "groq", "api_key": "g", "models": ["a"] } ] }"#,
    );
    let mut config = Config::from_file(&path).unwrap();
    config
        .apply_overrides(|key| (key == "GROQ_MODELS").then(|| "b,c".to_string()))
        .unwrap();

    assert_eq!(config.provider("groq").unwrap().models, vec!["b", "c"]);
}

#[test]
fn test_from_file_withInvalidJson_shouldFail() {
    let temp_dir = common::create_temp_dir();
    let path = common::create_test_file(temp_dir.path(), "config.json", "{ not json");
    assert!(Config::from_file(&path).is_err());
}

#[test]
fn test_effective_workers_shouldStayWithinCpuCount() {
    let mut config = Config::default();
    config.max_workers = 0;
    assert_eq!(config.effective_workers(), 1);
    config.max_workers = 10_000;
    assert_eq!(config.effective_workers(), num_cpus::get().max(1));
}
