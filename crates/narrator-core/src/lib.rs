//! Sentence-sequenced audiobook playback.
//!
//! The crate splits extracted document text into sentences, detects a
//! best-effort chapter index, and drives one sentence at a time through a
//! pluggable speech backend with pause/resume/stop, seeking and live rate
//! changes. Bookmarks are persisted per document title.

pub mod backend;
pub mod bookmarks;
pub mod cache;
pub mod cancellation;
pub mod chapters;
pub mod config;
pub mod document;
pub mod engine;
pub mod segmenter;
