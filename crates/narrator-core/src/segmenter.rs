//! Turns extracted document text into an ordered list of speakable sentences.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

use crate::chapters::{self, Chapter};

/// Pieces shorter than this are dropped as noise.
pub const MIN_SENTENCE_CHARS: usize = 6;
/// A fallback chunk stops growing once it holds more than this many words.
pub const MAX_CHUNK_WORDS: usize = 25;

/// A positioned string as produced by the document extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextToken {
    pub text: String,
}

impl From<&str> for TextToken {
    fn from(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segmentation {
    pub sentences: Vec<String>,
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("Could not extract any text from the document.")]
    NoExtractableText,
}

/// Split `text` into sentences and anchor chapter headings found in `tokens`.
pub fn segment(text: &str, tokens: &[TextToken]) -> Result<Segmentation, SegmentError> {
    let normalized: String = text.nfkc().collect();

    let mut sentences = split_sentences(&normalized);
    if sentences.is_empty() {
        debug!("No usable sentence boundaries, chunking by word count");
        sentences = chunk_words(&normalized);
    }
    if sentences.is_empty() {
        return Err(SegmentError::NoExtractableText);
    }

    let candidates = chapters::detect_candidates(
        tokens
            .iter()
            .map(|token| token.text.nfkc().collect::<String>()),
    );
    let chapters = chapters::resolve_chapters(&candidates, &sentences);

    info!(
        sentences = sentences.len(),
        chapters = chapters.len(),
        "Segmented document"
    );
    Ok(Segmentation {
        sentences,
        chapters,
    })
}

/// Split on terminal punctuation followed by whitespace or end of text.
///
/// Closing quotes and brackets directly after the punctuation stay with the
/// sentence. Returns nothing when the text has no boundary at all, leaving the
/// caller to fall back to word chunks.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut found_boundary = false;
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if !is_terminal(ch) {
            continue;
        }
        let mut end = idx + ch.len_utf8();
        while let Some(&(next_idx, next)) = chars.peek() {
            if !is_terminal(next) && !is_closer(next) {
                break;
            }
            end = next_idx + next.len_utf8();
            chars.next();
        }
        let at_boundary = match chars.peek() {
            None => true,
            Some(&(_, next)) => next.is_whitespace(),
        };
        if at_boundary {
            found_boundary = true;
            push_cleaned(&mut sentences, &text[start..end]);
            start = end;
        }
    }

    if !found_boundary {
        return Vec::new();
    }
    push_cleaned(&mut sentences, &text[start..]);
    sentences
}

/// Group whitespace-separated words into chunks of at most 26 words.
pub fn chunk_words(text: &str) -> Vec<String> {
    let mut chunks: Vec<Vec<&str>> = Vec::new();
    for word in text.split_whitespace() {
        match chunks.last_mut() {
            Some(chunk) if chunk.len() <= MAX_CHUNK_WORDS => chunk.push(word),
            _ => chunks.push(vec![word]),
        }
    }
    chunks.into_iter().map(|chunk| chunk.join(" ")).collect()
}

fn push_cleaned(out: &mut Vec<String>, piece: &str) {
    let cleaned = collapse_whitespace(piece);
    if cleaned.chars().count() >= MIN_SENTENCE_CHARS {
        out.push(cleaned);
    }
}

fn collapse_whitespace(piece: &str) -> String {
    piece.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_terminal(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

fn is_closer(ch: char) -> bool {
    matches!(ch, '"' | '\'' | '\u{201D}' | '\u{2019}' | ')' | ']')
}
