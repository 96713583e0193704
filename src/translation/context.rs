/*!
 * Translation context and reference windows.
 *
 * `TranslationContext` travels with every request. In context mode a batch
 * payload is prefixed with a reference section holding up to
 * `context_window_size` blocks on each side of the batch:
 * - prior blocks with their translation when one exists
 * - following blocks as originals only
 */

use serde::{Deserialize, Serialize};

use crate::app_config::{Config, TranslationMode};
use crate::subtitle_processor::{BlockStatus, SubtitleBlock};
use crate::translation::markers;

/// Per-request translation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationContext {
    pub target_language: String,

    #[serde(default)]
    pub source_language: Option<String>,

    #[serde(default)]
    pub mode: TranslationMode,

    #[serde(default)]
    pub context_window_size: usize,

    /// Provider to try first when eligible
    #[serde(default)]
    pub preferred_provider: Option<String>,
}

impl TranslationContext {
    pub fn new(target_language: &str) -> Self {
        Self {
            target_language: target_language.to_string(),
            source_language: None,
            mode: TranslationMode::Simple,
            context_window_size: 0,
            preferred_provider: None,
        }
    }

    /// Context for one run, built from configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_language: config.target_language.clone(),
            source_language: config.source_language.clone(),
            mode: config.translation.mode,
            context_window_size: config.translation.context_window_size,
            preferred_provider: None,
        }
    }

    pub fn with_source_language(mut self, source: &str) -> Self {
        self.source_language = Some(source.to_string());
        self
    }

    pub fn with_mode(mut self, mode: TranslationMode, window: usize) -> Self {
        self.mode = mode;
        self.context_window_size = window;
        self
    }

    pub fn with_preferred_provider(mut self, provider: Option<String>) -> Self {
        self.preferred_provider = provider;
        self
    }

    pub fn is_context_aware(&self) -> bool {
        self.mode == TranslationMode::Context && self.context_window_size > 0
    }
}

/// A block shown to the model for reference only
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEntry {
    pub original: String,
    pub translated: Option<String>,
}

/// Reference blocks around one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextWindow {
    /// Blocks before the batch, oldest first
    pub prior: Vec<ReferenceEntry>,

    /// Blocks after the batch
    pub following: Vec<ReferenceEntry>,
}

impl ContextWindow {
    /// Window around `blocks[start..end]`
    pub fn around(blocks: &[SubtitleBlock], start: usize, end: usize, size: usize) -> Self {
        let prior_start = start.saturating_sub(size);
        let following_end = (end + size).min(blocks.len());

        let prior = blocks[prior_start..start]
            .iter()
            .map(|block| ReferenceEntry {
                original: block.source_text.clone(),
                translated: (block.status == BlockStatus::Translated)
                    .then(|| block.translated_text.clone())
                    .flatten(),
            })
            .collect();
        let following = blocks[end.min(blocks.len())..following_end]
            .iter()
            .map(|block| ReferenceEntry {
                original: block.source_text.clone(),
                translated: None,
            })
            .collect();

        Self { prior, following }
    }

    pub fn is_empty(&self) -> bool {
        self.prior.is_empty() && self.following.is_empty()
    }

    /// Render the reference section placed before the blocks
    pub fn render(&self) -> String {
        let mut out = String::from("---CONTEXT (reference only, do not translate or return)---\n");
        for entry in &self.prior {
            let original = flatten_reference(&entry.original);
            match &entry.translated {
                Some(translated) => out.push_str(&format!(
                    "[before] {} => {}\n",
                    original,
                    flatten_reference(translated)
                )),
                None => out.push_str(&format!("[before] {}\n", original)),
            }
        }
        for entry in &self.following {
            out.push_str(&format!("[after] {}\n", flatten_reference(&entry.original)));
        }
        out.push_str("---END CONTEXT---");
        out
    }
}

// Reference lines must never look like block markers to the decoder.
fn flatten_reference(text: &str) -> String {
    let single_line = text.lines().map(str::trim).collect::<Vec<_>>().join(" / ");
    if markers::contains_marker(&single_line) {
        single_line.replace("---", "-")
    } else {
        single_line
    }
}

/// Marker payload for a batch, prefixed with its reference section when not empty
pub fn encode_with_context<S: AsRef<str>>(window: &ContextWindow, texts: &[S]) -> String {
    let blocks = markers::encode_batch(texts);
    if window.is_empty() {
        blocks
    } else {
        format!("{}\n\n{}", window.render(), blocks)
    }
}
