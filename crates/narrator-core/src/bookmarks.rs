//! Per-title bookmark sets and their on-disk form.
//!
//! Bookmarks live next to other per-document cache data in a small TOML file
//! with one `[[bookmarks]]` table per entry.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache;

const SNIPPET_CHARS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub sentence_index: usize,
    pub text_snippet: String,
}

impl Bookmark {
    pub fn new(sentence_index: usize, sentence: &str) -> Self {
        Self {
            sentence_index,
            text_snippet: snippet(sentence),
        }
    }
}

/// First 40 characters of a sentence followed by an ellipsis.
pub fn snippet(sentence: &str) -> String {
    let mut out: String = sentence.chars().take(SNIPPET_CHARS).collect();
    out.push_str("...");
    out
}

/// Bookmarks for one title, kept sorted and unique by sentence index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BookmarkSet {
    title: String,
    entries: Vec<Bookmark>,
}

impl BookmarkSet {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            entries: Vec::new(),
        }
    }

    pub fn from_entries(title: impl Into<String>, mut entries: Vec<Bookmark>) -> Self {
        entries.sort_by_key(|b| b.sentence_index);
        entries.dedup_by_key(|b| b.sentence_index);
        Self {
            title: title.into(),
            entries,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn entries(&self) -> &[Bookmark] {
        &self.entries
    }

    pub fn get(&self, position: usize) -> Option<&Bookmark> {
        self.entries.get(position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, sentence_index: usize) -> bool {
        self.position_of(sentence_index).is_ok()
    }

    /// Returns false when the sentence is already bookmarked.
    pub fn insert(&mut self, bookmark: Bookmark) -> bool {
        match self.position_of(bookmark.sentence_index) {
            Ok(_) => false,
            Err(pos) => {
                self.entries.insert(pos, bookmark);
                true
            }
        }
    }

    /// Remove the bookmark on `sentence_index`, if there is one.
    pub fn remove(&mut self, sentence_index: usize) -> Option<Bookmark> {
        let position = self.position_of(sentence_index).ok()?;
        Some(self.entries.remove(position))
    }

    fn position_of(&self, sentence_index: usize) -> std::result::Result<usize, usize> {
        self.entries
            .binary_search_by_key(&sentence_index, |b| b.sentence_index)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BookmarkFile {
    #[serde(default)]
    bookmarks: Vec<Bookmark>,
}

/// Reads and writes bookmark sets under the cache root.
#[derive(Debug, Clone)]
pub struct BookmarkStore {
    cache_root: PathBuf,
}

impl BookmarkStore {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Load the saved set for `title`, or an empty one if nothing usable exists.
    pub fn load(&self, title: &str) -> BookmarkSet {
        let path = cache::bookmarks_path(&self.cache_root, title);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(_) => {
                debug!(path = %path.display(), "No saved bookmarks");
                return BookmarkSet::new(title);
            }
        };
        match toml::from_str::<BookmarkFile>(&contents) {
            Ok(file) => {
                debug!(
                    path = %path.display(),
                    count = file.bookmarks.len(),
                    "Loaded bookmarks"
                );
                BookmarkSet::from_entries(title, file.bookmarks)
            }
            Err(err) => {
                warn!(path = %path.display(), "Ignoring unreadable bookmarks: {err}");
                BookmarkSet::new(title)
            }
        }
    }

    /// Persist `set`; failures are logged and otherwise ignored.
    pub fn save(&self, set: &BookmarkSet) {
        if let Err(err) = self.try_save(set) {
            warn!(title = set.title(), "Failed to save bookmarks: {err:#}");
        }
    }

    fn try_save(&self, set: &BookmarkSet) -> Result<()> {
        let path = cache::bookmarks_path(&self.cache_root, set.title());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let file = BookmarkFile {
            bookmarks: set.entries().to_vec(),
        };
        let contents = toml::to_string(&file).context("serializing bookmarks")?;
        let tmp = cache::unique_temp_path(&path);
        fs::write(&tmp, contents).with_context(|| format!("writing {}", tmp.display()))?;
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err).with_context(|| format!("replacing {}", path.display()));
        }
        debug!(path = %path.display(), count = set.len(), "Saved bookmarks");
        Ok(())
    }
}
