/*!
 * Block marker codec for batch translation payloads.
 *
 * A batch of N source texts is sent as
 *
 * ```text
 * ---BLOCK 1---
 * first text
 * ---END BLOCK 1---
 *
 * ---BLOCK 2---
 * ...
 * ```
 *
 * and the response must carry exactly the pairs `1..N` back, each with a
 * non-empty payload. Anything outside the markers is ignored.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::TranslationError;

/// Matches one complete block, capturing start index, payload and end index
static BLOCK_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)---BLOCK (\d+)---(.*?)---END BLOCK (\d+)---").expect("Invalid block marker regex")
});

/// Matches any single start or end marker
static ANY_MARKER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"---(?:END )?BLOCK \d+---").expect("Invalid marker regex")
});

/// Start marker for position `k`
pub fn start_marker(k: usize) -> String {
    format!("---BLOCK {}---", k)
}

/// End marker for position `k`
pub fn end_marker(k: usize) -> String {
    format!("---END BLOCK {}---", k)
}

/// Wrap each text in numbered markers, 1-based, blank line between wrappers
pub fn encode_batch<S: AsRef<str>>(texts: &[S]) -> String {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}\n{}\n{}", start_marker(i + 1), text.as_ref(), end_marker(i + 1)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Whether a text contains anything that looks like a block marker
pub fn contains_marker(text: &str) -> bool {
    ANY_MARKER_REGEX.is_match(text)
}

/// Outcome of checking a response against the expected block count
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerValidationResult {
    /// Number of blocks sent
    pub expected: usize,
    /// Start indices of the well-formed pairs, in response order
    pub found_indices: Vec<usize>,
    /// Indices in `1..=expected` with no pair
    pub missing_indices: Vec<usize>,
    /// Indices seen more than once or outside `1..=expected`
    pub unexpected_indices: Vec<usize>,
    /// Pairs whose start and end numbers differ, as (start, end)
    pub mismatched_pairs: Vec<(usize, usize)>,
    /// Indices whose payload is empty after trim or holds another marker
    pub invalid_payloads: Vec<usize>,
}

impl MarkerValidationResult {
    pub fn passed(&self) -> bool {
        self.found_indices.len() == self.expected
            && self.missing_indices.is_empty()
            && self.unexpected_indices.is_empty()
            && self.mismatched_pairs.is_empty()
            && self.invalid_payloads.is_empty()
    }

    /// Human readable reason for a failed validation
    pub fn describe(&self) -> String {
        let mut problems = Vec::new();
        if self.found_indices.len() != self.expected {
            problems.push(format!(
                "expected {} blocks, found {}",
                self.expected,
                self.found_indices.len()
            ));
        }
        if !self.missing_indices.is_empty() {
            problems.push(format!("missing {:?}", self.missing_indices));
        }
        if !self.unexpected_indices.is_empty() {
            problems.push(format!("unexpected {:?}", self.unexpected_indices));
        }
        if !self.mismatched_pairs.is_empty() {
            problems.push(format!("mismatched pairs {:?}", self.mismatched_pairs));
        }
        if !self.invalid_payloads.is_empty() {
            problems.push(format!("empty or nested payloads {:?}", self.invalid_payloads));
        }
        problems.join(", ")
    }
}

struct ScannedBlock {
    start: usize,
    end: usize,
    payload: String,
}

fn scan(response: &str) -> Vec<ScannedBlock> {
    BLOCK_REGEX
        .captures_iter(response)
        .filter_map(|cap| {
            let start = cap.get(1)?.as_str().parse().ok()?;
            let end = cap.get(3)?.as_str().parse().ok()?;
            let payload = cap.get(2)?.as_str().trim().to_string();
            Some(ScannedBlock { start, end, payload })
        })
        .collect()
}

fn check(blocks: &[ScannedBlock], expected: usize) -> MarkerValidationResult {
    let mut result = MarkerValidationResult {
        expected,
        ..Default::default()
    };
    let mut seen = vec![false; expected + 1];

    for block in blocks {
        result.found_indices.push(block.start);
        if block.start != block.end {
            result.mismatched_pairs.push((block.start, block.end));
        }
        if block.start == 0 || block.start > expected || seen[block.start] {
            result.unexpected_indices.push(block.start);
        } else {
            seen[block.start] = true;
        }
        if block.payload.is_empty() || contains_marker(&block.payload) {
            result.invalid_payloads.push(block.start);
        }
    }

    result.missing_indices = (1..=expected).filter(|k| !seen[*k]).collect();
    result
}

/// Every well-formed block in `text` as (start index, trimmed payload), unvalidated
pub fn scan_payloads(text: &str) -> Vec<(usize, String)> {
    scan(text).into_iter().map(|b| (b.start, b.payload)).collect()
}

/// Check a response without extracting payloads
pub fn validate(response: &str, expected: usize) -> MarkerValidationResult {
    check(&scan(response), expected)
}

/// Extract the payload of every block, ordered by marker index
pub fn decode_batch(response: &str, expected: usize) -> Result<Vec<String>, TranslationError> {
    let blocks = scan(response);
    let result = check(&blocks, expected);
    if !result.passed() {
        debug!("Marker validation failed: {}", result.describe());
        return Err(TranslationError::StructureMismatch(result.describe()));
    }

    let mut ordered = vec![String::new(); expected];
    for block in blocks {
        ordered[block.start - 1] = block.payload;
    }
    Ok(ordered)
}
