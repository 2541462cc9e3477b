//! Overlapping, boundary-respecting text chunker.
//!
//! Splits raw document text into [`TextSegment`]s bounded by a configurable
//! `max_tokens` limit. Splitting accumulates sentence units (grouped by
//! paragraph when `respect_paragraphs` is set) into a running buffer; when a
//! segment closes, the last `overlap_words` words seed the next segment so
//! adjacent chunks share context. A trailing buffer below `min_tokens` is
//! discarded rather than emitted, which prevents degenerate near-empty
//! chunks; an input that is *entirely* below `min_tokens` still yields one
//! segment, since dropping it would leave the document unsearchable.
//!
//! Token counts are a deterministic chars/4 heuristic, not a real tokenizer.
//! Callers must not assume compatibility with any model's true token count.

use serde::{Deserialize, Serialize};

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Deterministic, cheap token estimate based on character length.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum segment size in estimated tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Trailing words carried into the next segment.
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
    /// Segments below this size are not emitted.
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    /// Prefer paragraph boundaries when closing segments.
    #[serde(default = "default_respect_paragraphs")]
    pub respect_paragraphs: bool,
}

fn default_max_tokens() -> usize {
    400
}
fn default_overlap_words() -> usize {
    24
}
fn default_min_tokens() -> usize {
    16
}
fn default_respect_paragraphs() -> bool {
    true
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_words: default_overlap_words(),
            min_tokens: default_min_tokens(),
            respect_paragraphs: default_respect_paragraphs(),
        }
    }
}

/// A chunk of text with its position and token estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSegment {
    pub text: String,
    /// Ordinal index within the source text, contiguous from 0.
    pub ordinal: i64,
    pub token_estimate: usize,
}

/// Split text into overlapping segments. Pure function over its input:
/// empty or whitespace-only input yields an empty vec, never an error.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<TextSegment> {
    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let units = split_units(&normalized, config.respect_paragraphs);

    let mut segments: Vec<TextSegment> = Vec::new();
    let mut buf = String::new();

    for unit in units {
        let unit_tokens = estimate_tokens(&unit);

        // A single unit larger than the limit is hard-split by words.
        if unit_tokens > config.max_tokens {
            if estimate_tokens(&buf) >= config.min_tokens {
                close_segment(&mut segments, &buf);
            }
            buf.clear();
            for piece in hard_split(&unit, config.max_tokens) {
                close_segment(&mut segments, &piece);
            }
            if let Some(last) = segments.last() {
                buf = overlap_tail(&last.text, config.overlap_words);
            }
            continue;
        }

        let would_be = if buf.is_empty() {
            unit_tokens
        } else {
            estimate_tokens(&buf) + 1 + unit_tokens
        };

        if would_be > config.max_tokens && estimate_tokens(&buf) >= config.min_tokens {
            close_segment(&mut segments, &buf);
            // Seed the next segment with the tail of the closed one.
            buf = overlap_tail(&buf, config.overlap_words);
        }

        if !buf.is_empty() {
            buf.push(' ');
        }
        buf.push_str(&unit);
    }

    // Final partial buffer below minimum size is discarded, unless nothing
    // was emitted at all (a short input still deserves one chunk).
    let tail_tokens = estimate_tokens(&buf);
    let tail_is_overlap_only = segments
        .last()
        .map(|s| s.text.ends_with(buf.trim()))
        .unwrap_or(false);
    if !buf.trim().is_empty()
        && !tail_is_overlap_only
        && (tail_tokens >= config.min_tokens || segments.is_empty())
    {
        close_segment(&mut segments, &buf);
    }

    segments
}

fn close_segment(segments: &mut Vec<TextSegment>, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    segments.push(TextSegment {
        text: trimmed.to_string(),
        ordinal: segments.len() as i64,
        token_estimate: estimate_tokens(trimmed),
    });
}

/// Collapse intra-paragraph whitespace to single spaces while preserving
/// blank-line paragraph boundaries as `\n\n`.
fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.extend(line.split_whitespace());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    paragraphs.join("\n\n")
}

/// Split normalized text into accumulation units: sentences, walked
/// paragraph-by-paragraph when paragraph boundaries are respected.
fn split_units(normalized: &str, respect_paragraphs: bool) -> Vec<String> {
    if respect_paragraphs {
        normalized
            .split("\n\n")
            .flat_map(|p| split_sentences(p))
            .collect()
    } else {
        split_sentences(&normalized.replace("\n\n", " "))
    }
}

/// Split a paragraph into sentences at `.`, `!`, `?` followed by whitespace.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = paragraph.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if matches!(c, '.' | '!' | '?') {
            let at_end = i + 1 == bytes.len();
            let before_space = !at_end && (bytes[i + 1] as char).is_whitespace();
            if at_end || before_space {
                let sentence = paragraph[start..=i].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = i + 1;
            }
        }
        i += 1;
    }

    let rest = paragraph[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }

    sentences
}

/// The last `n` words of a closed segment, used to seed the next one.
fn overlap_tail(text: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.len().saturating_sub(n);
    words[start..].join(" ")
}

/// Word-boundary hard split for a single oversized unit.
fn hard_split(unit: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces = Vec::new();
    let mut buf = String::new();

    for word in unit.split_whitespace() {
        if !buf.is_empty() && buf.chars().count() + 1 + word.chars().count() > max_chars {
            pieces.push(std::mem::take(&mut buf));
        }
        if !buf.is_empty() {
            buf.push(' ');
        }
        buf.push_str(word);
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
}
