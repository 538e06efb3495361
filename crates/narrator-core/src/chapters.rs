//! Best-effort chapter detection.
//!
//! Candidates come from short positioned tokens (page-level strings) rather
//! than from the sentence text, then get anchored to the first sentence that
//! mentions them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Accepted chapters are at least this many sentences apart.
pub const MIN_CHAPTER_SPACING: usize = 5;

const MIN_CANDIDATE_CHARS: usize = 4;
const MAX_HEADING_CHARS: usize = 49;

static RE_NUMBERED_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(chapter|part|book)\s+([0-9]+|[ivxlcdm]+|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve|thirteen|fourteen|fifteen|sixteen|seventeen|eighteen|nineteen|twenty)\b",
    )
    .unwrap()
});
static RE_CAPS_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z\s,\-]{5,49}$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub sentence_index: usize,
}

/// Whether a trimmed token looks like a chapter heading.
pub fn is_chapter_candidate(token: &str) -> bool {
    let chars = token.chars().count();
    if chars < MIN_CANDIDATE_CHARS {
        return false;
    }
    if RE_NUMBERED_HEADING.is_match(token) {
        return true;
    }
    chars <= MAX_HEADING_CHARS
        && !token.contains('.')
        && token.chars().any(|c| c.is_ascii_uppercase())
        && RE_CAPS_HEADING.is_match(token)
}

/// Scan tokens in document order and keep heading-like ones.
///
/// A token already contained in an earlier candidate is skipped, so running
/// headers repeated on every page collapse onto their first occurrence.
pub fn detect_candidates<I>(tokens: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut candidates: Vec<String> = Vec::new();
    for token in tokens {
        let text = token.as_ref().trim();
        if !is_chapter_candidate(text) {
            continue;
        }
        if candidates.iter().any(|seen| seen.contains(text)) {
            continue;
        }
        candidates.push(text.to_string());
    }
    debug!(count = candidates.len(), "Detected chapter candidates");
    candidates
}

/// Anchor candidates to sentences, dropping ones crowded by an earlier pick.
pub fn resolve_chapters(candidates: &[String], sentences: &[String]) -> Vec<Chapter> {
    let mut chapters: Vec<Chapter> = Vec::new();
    for candidate in candidates {
        let Some(index) = sentences
            .iter()
            .position(|sentence| sentence.contains(candidate.as_str()))
        else {
            continue;
        };
        let crowded = chapters
            .iter()
            .any(|chapter| chapter.sentence_index.abs_diff(index) < MIN_CHAPTER_SPACING);
        if !crowded {
            chapters.push(Chapter {
                title: candidate.clone(),
                sentence_index: index,
            });
        }
    }
    chapters.sort_by_key(|chapter| chapter.sentence_index);
    chapters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[test]
    fn numbered_headings_are_candidates() {
        assert!(is_chapter_candidate("Chapter 12"));
        assert!(is_chapter_candidate("PART IV: The Return"));
        assert!(is_chapter_candidate("book iii"));
        assert!(is_chapter_candidate("chapter two"));
    }

    #[test]
    fn numeral_must_be_a_whole_word() {
        assert!(!is_chapter_candidate("Book Description"));
        assert!(!is_chapter_candidate("Parting words"));
    }

    #[test]
    fn short_uppercase_runs_are_candidates() {
        assert!(is_chapter_candidate("THE WHITE WHALE"));
        assert!(is_chapter_candidate("LOOMINGS, AGAIN"));
        assert!(!is_chapter_candidate("THE END."));
        assert!(!is_chapter_candidate("The White Whale"));
        assert!(!is_chapter_candidate("-----"));
        assert!(!is_chapter_candidate(
            "A VERY LONG UPPERCASE LINE THAT KEEPS GOING WELL PAST FIFTY"
        ));
    }

    #[test]
    fn repeated_running_headers_collapse() {
        let candidates = detect_candidates([
            "CHAPTER ONE THE SEA",
            "Some body text here.",
            "THE SEA",
            "CHAPTER ONE THE SEA",
            "Chapter 2",
        ]);
        assert_eq!(candidates, owned(&["CHAPTER ONE THE SEA", "Chapter 2"]));
    }

    #[test]
    fn crowded_candidates_are_suppressed_and_result_sorted() {
        let sentences: Vec<String> = (0..20).map(|i| format!("Sentence {i} body.")).collect();
        let mut sentences = sentences;
        sentences[12] = "Chapter 3 begins here.".to_string();
        sentences[2] = "Chapter 1 begins here.".to_string();
        sentences[4] = "Chapter 2 begins here.".to_string();

        let chapters = resolve_chapters(
            &owned(&["Chapter 3", "Chapter 1", "Chapter 2", "Chapter 9"]),
            &sentences,
        );

        assert_eq!(
            chapters,
            vec![
                Chapter {
                    title: "Chapter 1".to_string(),
                    sentence_index: 2
                },
                Chapter {
                    title: "Chapter 3".to_string(),
                    sentence_index: 12
                },
            ]
        );
    }

    #[test]
    fn resolved_chapters_keep_minimum_spacing() {
        let sentences: Vec<String> = (0..40).map(|i| format!("Line {i} CH{i}.")).collect();
        let candidates: Vec<String> = (0..40).rev().map(|i| format!("CH{i}.")).collect();

        let chapters = resolve_chapters(&candidates, &sentences);

        assert!(!chapters.is_empty());
        for pair in chapters.windows(2) {
            assert!(pair[0].sentence_index < pair[1].sentence_index);
            assert!(pair[1].sentence_index - pair[0].sentence_index >= MIN_CHAPTER_SPACING);
        }
    }
}
