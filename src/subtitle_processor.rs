use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::SubtitleError;
use crate::file_utils::FileManager;

// @module: Subtitle parsing, block model and SRT writing

// @const: SRT timestamp range regex (comma or dot before milliseconds)
static TIMESTAMP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{3})")
        .expect("Invalid timestamp regex")
});

/// Placeholder written for blocks whose every translation attempt failed
pub const SENTINEL_TRANSLATION: &str = "[TRANSLATION ERROR]";

const UTF8_BOM: &str = "\u{feff}";

/// Text as it can sit inside one SRT block: no blank lines, no trailing whitespace
pub fn cue_text(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Translation state of a single block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Untranslated,
    Translated,
    /// Every attempt returned a payload whose markers did not round-trip
    FailedStructure,
    /// Every attempt failed at the provider layer
    FailedProvider,
}

impl BlockStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::FailedStructure | Self::FailedProvider)
    }
}

// @struct: Single timed subtitle block
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleBlock {
    // @field: 1-based sequence number as read from the file
    pub index: usize,

    // @field: Start time in ms
    pub start_ms: u64,

    // @field: End time in ms
    pub end_ms: u64,

    // @field: Original text, may span several lines
    pub source_text: String,

    // @field: Translation, present only once translated
    pub translated_text: Option<String>,

    pub status: BlockStatus,
}

impl SubtitleBlock {
    /// Creates an untranslated block without validation
    pub fn new(index: usize, start_ms: u64, end_ms: u64, source_text: impl Into<String>) -> Self {
        Self {
            index,
            start_ms,
            end_ms,
            source_text: source_text.into(),
            translated_text: None,
            status: BlockStatus::Untranslated,
        }
    }

    // @creates: Validated block
    // @validates: start < end and non-empty text
    pub fn new_validated(index: usize, start_ms: u64, end_ms: u64, text: &str) -> Result<Self> {
        if end_ms <= start_ms {
            return Err(anyhow!(
                "Invalid time range: end time {} <= start time {}",
                end_ms, start_ms
            ));
        }
        if text.trim().is_empty() {
            return Err(anyhow!("Empty subtitle text for block {}", index));
        }
        Ok(Self::new(index, start_ms, end_ms, text.trim_end()))
    }

    /// Record a successful translation, dropping blank lines a block cannot carry
    pub fn set_translation(&mut self, text: impl AsRef<str>) {
        self.translated_text = Some(cue_text(text.as_ref()));
        self.status = BlockStatus::Translated;
    }

    /// Mark the block failed; the writer emits the sentinel so alignment is kept
    pub fn mark_failed(&mut self, status: BlockStatus) {
        debug_assert!(status.is_failed());
        self.translated_text = None;
        self.status = status;
    }

    /// Whether the block still needs a translation
    pub fn needs_translation(&self) -> bool {
        self.status != BlockStatus::Translated
    }

    /// Text the writer emits for this block
    pub fn output_text(&self) -> &str {
        if self.status.is_failed() {
            return SENTINEL_TRANSLATION;
        }
        self.translated_text.as_deref().unwrap_or(&self.source_text)
    }

    /// Whether the emitted text is the failure sentinel
    pub fn is_sentinel(&self) -> bool {
        self.output_text().trim() == SENTINEL_TRANSLATION
    }

    /// Parse an SRT timestamp (HH:MM:SS,mmm) to milliseconds
    pub fn parse_timestamp(timestamp: &str) -> Result<u64> {
        let parts: Vec<&str> = timestamp.trim().split(&[':', ',', '.'][..]).collect();
        if parts.len() != 4 {
            return Err(anyhow!("Invalid timestamp format: {}", timestamp));
        }
        let hours: u64 = parts[0].parse()?;
        let minutes: u64 = parts[1].parse()?;
        let seconds: u64 = parts[2].parse()?;
        let millis: u64 = parts[3].parse()?;
        if minutes >= 60 || seconds >= 60 || millis >= 1000 {
            return Err(anyhow!("Invalid time components in timestamp: {}", timestamp));
        }
        Ok(hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + millis)
    }

    /// Format milliseconds as an SRT timestamp (HH:MM:SS,mmm)
    pub fn format_timestamp(ms: u64) -> String {
        let hours = ms / 3_600_000;
        let minutes = (ms % 3_600_000) / 60_000;
        let seconds = (ms % 60_000) / 1_000;
        let millis = ms % 1_000;
        format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
    }

    /// The `start --> end` line
    pub fn timing_line(&self) -> String {
        format!(
            "{} --> {}",
            Self::format_timestamp(self.start_ms),
            Self::format_timestamp(self.end_ms)
        )
    }
}

/// Ordered blocks of one subtitle file
#[derive(Debug, Clone)]
pub struct SubtitleCollection {
    /// File the blocks were read from
    pub source_file: PathBuf,

    pub blocks: Vec<SubtitleBlock>,
}

impl SubtitleCollection {
    pub fn new(source_file: PathBuf, blocks: Vec<SubtitleBlock>) -> Self {
        Self { source_file, blocks }
    }

    /// Read and parse an SRT file
    pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Self, SubtitleError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| SubtitleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let content = Self::decode_bytes(&bytes);
        let blocks = Self::parse_srt_string(&content);
        if blocks.is_empty() {
            return Err(SubtitleError::NoBlocks(path.display().to_string()));
        }
        debug!("Parsed {} blocks from {}", blocks.len(), path.display());
        Ok(Self::new(path.to_path_buf(), blocks))
    }

    /// Decode file bytes: UTF-8 (BOM stripped), falling back to Latin-1
    pub fn decode_bytes(bytes: &[u8]) -> String {
        match std::str::from_utf8(bytes) {
            Ok(text) => text.strip_prefix(UTF8_BOM).unwrap_or(text).to_string(),
            Err(e) => {
                warn!("Input is not valid UTF-8 ({}), decoding as Latin-1", e);
                // ISO-8859-1 maps every byte to the code point of the same value
                bytes.iter().map(|&b| b as char).collect()
            }
        }
    }

    /// Parse SRT content into blocks, skipping invalid blocks with a warning
    pub fn parse_srt_string(content: &str) -> Vec<SubtitleBlock> {
        let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
        let mut blocks: Vec<SubtitleBlock> = Vec::new();
        let mut paragraph: Vec<&str> = Vec::new();
        let mut paragraph_line = 0;

        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                if !paragraph.is_empty() {
                    Self::push_paragraph(&paragraph, paragraph_line, &mut blocks);
                    paragraph.clear();
                }
                continue;
            }
            if paragraph.is_empty() {
                paragraph_line = line_no + 1;
            }
            paragraph.push(line);
        }
        if !paragraph.is_empty() {
            Self::push_paragraph(&paragraph, paragraph_line, &mut blocks);
        }

        if blocks.is_empty() {
            warn!("No valid subtitle blocks found in content");
        }
        blocks
    }

    fn push_paragraph(lines: &[&str], line_no: usize, blocks: &mut Vec<SubtitleBlock>) {
        match Self::parse_paragraph(lines, blocks.last().map(|b| b.index)) {
            Ok(block) => blocks.push(block),
            Err(e) => warn!("Skipping invalid subtitle block at line {}: {}", line_no, e),
        }
    }

    fn parse_paragraph(lines: &[&str], previous_index: Option<usize>) -> Result<SubtitleBlock> {
        let first = lines[0].trim();

        // Some writers omit the index line; keep the numbering running.
        let (index, timing_at) = match first.parse::<usize>() {
            Ok(index) => (index, 1),
            Err(_) if TIMESTAMP_REGEX.is_match(first) => (previous_index.unwrap_or(0) + 1, 0),
            Err(_) => return Err(anyhow!("expected a block index, found '{}'", first)),
        };

        let timing = lines
            .get(timing_at)
            .map(|l| l.trim())
            .ok_or_else(|| anyhow!("block {} has no timestamp line", index))?;
        let caps = TIMESTAMP_REGEX
            .captures(timing)
            .ok_or_else(|| anyhow!("block {} has a malformed timestamp line '{}'", index, timing))?;
        let start_ms = Self::captures_to_ms(&caps, 1)?;
        let end_ms = Self::captures_to_ms(&caps, 5)?;

        let text = lines[timing_at + 1..]
            .iter()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n");

        SubtitleBlock::new_validated(index, start_ms, end_ms, &text)
    }

    fn captures_to_ms(caps: &regex::Captures, start_idx: usize) -> Result<u64> {
        let part = |i: usize| -> Result<u64> {
            caps.get(start_idx + i)
                .ok_or_else(|| anyhow!("missing timestamp component"))?
                .as_str()
                .parse::<u64>()
                .map_err(|e| anyhow!("bad timestamp component: {}", e))
        };
        let (hours, minutes, seconds, millis) = (part(0)?, part(1)?, part(2)?, part(3)?);
        if minutes >= 60 || seconds >= 60 {
            return Err(anyhow!("timestamp component out of range"));
        }
        Ok((hours * 3600 + minutes * 60 + seconds) * 1000 + millis)
    }

    /// Render canonical SRT: indices 1..M, one blank line between blocks, trailing newline
    pub fn to_srt_string(&self) -> String {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, block)| format!("{}\n{}\n{}\n", i + 1, block.timing_line(), cue_text(block.output_text())))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Write UTF-8 (no BOM, LF endings) atomically
    pub fn write_to_srt<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let rendered = self.to_srt_string();
        FileManager::write_atomic(path, rendered.as_bytes())
    }

    /// Whether both collections carry the same timings, element-wise
    pub fn timings_match(&self, other: &SubtitleCollection) -> bool {
        self.blocks.len() == other.blocks.len()
            && self
                .blocks
                .iter()
                .zip(&other.blocks)
                .all(|(a, b)| a.start_ms == b.start_ms && a.end_ms == b.end_ms)
    }

    /// Number of blocks carrying the failure sentinel
    pub fn sentinel_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_sentinel()).count()
    }
}

impl fmt::Display for SubtitleCollection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Subtitle Collection")?;
        writeln!(f, "Source: {:?}", self.source_file)?;
        writeln!(f, "Blocks: {}", self.blocks.len())?;
        Ok(())
    }
}
