/*!
 * Error types for the subflow application.
 *
 * Adapter failures are mapped onto the closed `ProviderError` taxonomy. The
 * dispatcher absorbs those into its fallback loop and only ever surfaces a
 * `TranslationError` to the batch layer.
 */

use std::fmt;

use thiserror::Error;

/// Errors an individual provider adapter can produce
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The vendor rejected the credentials (HTTP 401/403)
    #[error("Authentication rejected: {0}")]
    Authentication(String),

    /// The vendor (or the local ledger) asked us to wait
    #[error("Rate limited, retry after {retry_after_secs}s: {message}")]
    RateLimited {
        /// Seconds to wait before the model may be used again
        retry_after_secs: u64,
        /// Vendor message, if any
        message: String,
    },

    /// The request did not finish within the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// 5xx responses and network failures
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Any other 4xx response
    #[error("Bad request ({status_code}): {message}")]
    BadRequest {
        /// HTTP status code
        status_code: u16,
        /// Error body from the API
        message: String,
    },

    /// The vendor answered with nothing but whitespace
    #[error("Provider returned an empty result")]
    EmptyResult,
}

impl ProviderError {
    /// Short, stable name of the error kind, used for metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Transient(_) => "transient",
            Self::BadRequest { .. } => "bad_request",
            Self::EmptyResult => "empty_result",
        }
    }

    /// Whether this error counts toward the model and provider error streaks
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Transient(_) | Self::BadRequest { .. } | Self::EmptyResult
        )
    }
}

/// Last error seen for one provider during a dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    /// Provider name
    pub provider: String,
    /// Human readable last error
    pub message: String,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.message)
    }
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by the translation layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslationError {
    /// The response did not round-trip the block markers
    #[error("Structure mismatch: {0}")]
    StructureMismatch(String),

    /// Every candidate provider was exhausted
    #[error("No provider available ({})", join_failures(.0))]
    NoProviderAvailable(Vec<ProviderFailure>),

    /// The run was cancelled before this batch was dispatched
    #[error("Translation cancelled")]
    Cancelled,
}

/// Errors that can occur while reading or writing subtitle files
#[derive(Error, Debug)]
pub enum SubtitleError {
    /// The file could not be read or written
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Parsing produced zero usable blocks
    #[error("No valid subtitle blocks found in {0}")]
    NoBlocks(String),
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from subtitle processing
    #[error("Subtitle error: {0}")]
    Subtitle(#[from] SubtitleError),

    /// Error from translation
    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
