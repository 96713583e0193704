/*!
 * System prompt templates for block translation.
 *
 * Every request carries a system prompt that pins the marker contract;
 * the block payload itself goes in the user message.
 */

use crate::language_utils;

/// System prompt template with `{source_language}` / `{target_language}` placeholders
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// Default prompt for marker-delimited subtitle batches
    pub const BLOCK_TRANSLATOR: &'static str = r#"You are a professional subtitle translator. Translate the text from {source_language} to {target_language}.

Rules:
1. Return ONLY the translated text. No explanations, notes or commentary.
2. Keep every ---BLOCK k--- and ---END BLOCK k--- marker exactly as written, one pair per input block, with the same numbers.
3. Keep timestamps, numbers, code snippets, file extensions, programming-language names, company and product names, and certification names in their original form.
4. Keep the line breaks inside each block and return the same number of blocks you received.
5. Translate naturally and concisely; subtitles have limited display time."#;

    /// Extra rule appended when the payload carries a reference section
    pub const CONTEXT_RULE: &'static str = r#"6. Text between ---CONTEXT--- and ---END CONTEXT--- is reference only. Use it to keep names, tone and terminology consistent, but do not translate it and do not include it in your answer."#;

    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    pub fn block_translator() -> Self {
        Self::new(Self::BLOCK_TRANSLATOR)
    }

    /// Render with language names; an unknown source becomes "the source language"
    pub fn render(&self, source_language: Option<&str>, target_language: &str) -> String {
        let source = source_language
            .map(language_utils::display_language)
            .unwrap_or_else(|| "the source language".to_string());
        self.template
            .replace("{source_language}", &source)
            .replace("{target_language}", &language_utils::display_language(target_language))
    }

    /// Render and append the reference-context rule
    pub fn render_with_context(&self, source_language: Option<&str>, target_language: &str) -> String {
        format!("{}\n{}", self.render(source_language, target_language), Self::CONTEXT_RULE)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::block_translator()
    }
}
