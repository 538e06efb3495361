//! A loaded document: its sentences, chapters, bookmarks and the one playback
//! engine that reads it. Dropping the session stops playback.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::backend::{self, BackendError, REMOTE_VOICES, SpeechBackend, Voice};
use crate::bookmarks::{Bookmark, BookmarkSet, BookmarkStore};
use crate::chapters::Chapter;
use crate::config::{BackendKind, NarratorConfig};
use crate::engine::{EngineError, EngineEvent, PlaybackEngine, PlaybackPhase};
use crate::segmenter::{self, SegmentError, TextToken};

/// Builds a backend for a kind; swapped out in tests.
pub type BackendFactory =
    fn(BackendKind, &NarratorConfig) -> Result<Arc<dyn SpeechBackend>, BackendError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("there is no chapter {0}")]
    UnknownChapter(usize),
    #[error("there is no bookmark {0}")]
    UnknownBookmark(usize),
    #[error("unknown voice {0:?}")]
    UnknownVoice(String),
}

pub struct DocumentSession {
    title: String,
    sentences: Arc<[String]>,
    chapters: Vec<Chapter>,
    bookmarks: BookmarkSet,
    store: BookmarkStore,
    config: NarratorConfig,
    factory: BackendFactory,
    engine: PlaybackEngine,
}

impl DocumentSession {
    pub fn load(
        title: &str,
        text: &str,
        tokens: &[TextToken],
        config: NarratorConfig,
    ) -> Result<Self, SessionError> {
        Self::load_with_factory(title, text, tokens, config, backend::create_backend)
    }

    pub fn load_with_factory(
        title: &str,
        text: &str,
        tokens: &[TextToken],
        config: NarratorConfig,
        factory: BackendFactory,
    ) -> Result<Self, SessionError> {
        let segmentation = segmenter::segment(text, tokens)?;
        let sentences: Arc<[String]> = segmentation.sentences.into();

        let store = BookmarkStore::new(&config.cache_dir);
        let saved = store.load(title);
        let bookmarks = BookmarkSet::from_entries(
            title,
            saved
                .entries()
                .iter()
                .filter(|bookmark| bookmark.sentence_index < sentences.len())
                .cloned()
                .collect(),
        );

        let backend = factory(config.backend, &config)?;
        let engine = PlaybackEngine::new(Arc::clone(&sentences), backend, config.playback_rate);
        info!(
            title,
            sentences = sentences.len(),
            chapters = segmentation.chapters.len(),
            bookmarks = bookmarks.len(),
            "Document loaded"
        );
        Ok(Self {
            title: title.to_string(),
            sentences,
            chapters: segmentation.chapters,
            bookmarks,
            store,
            config,
            factory,
            engine,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn bookmarks(&self) -> &BookmarkSet {
        &self.bookmarks
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn config(&self) -> &NarratorConfig {
        &self.config
    }

    /// The chapter a sentence belongs to, if any chapter starts at or before it.
    pub fn chapter_at(&self, sentence_index: usize) -> Option<&Chapter> {
        self.chapters
            .iter()
            .take_while(|chapter| chapter.sentence_index <= sentence_index)
            .last()
    }

    /// Bookmark the current sentence. `None` if it is already bookmarked.
    pub fn add_bookmark(&mut self) -> Option<Bookmark> {
        let index = self.engine.snapshot().current_index;
        let sentence = self.sentences.get(index)?;
        let bookmark = Bookmark::new(index, sentence);
        if !self.bookmarks.insert(bookmark.clone()) {
            return None;
        }
        self.store.save(&self.bookmarks);
        Some(bookmark)
    }

    /// Remove the bookmark on `sentence_index`.
    pub fn delete_bookmark(&mut self, sentence_index: usize) -> bool {
        if self.bookmarks.remove(sentence_index).is_none() {
            return false;
        }
        self.store.save(&self.bookmarks);
        true
    }

    pub fn jump_to_chapter(&self, position: usize) -> Result<EngineEvent, SessionError> {
        let chapter = self
            .chapters
            .get(position)
            .ok_or(SessionError::UnknownChapter(position))?;
        Ok(self.engine.jump(chapter.sentence_index)?)
    }

    pub fn jump_to_bookmark(&self, position: usize) -> Result<EngineEvent, SessionError> {
        let bookmark = self
            .bookmarks
            .get(position)
            .ok_or(SessionError::UnknownBookmark(position))?;
        Ok(self.engine.jump(bookmark.sentence_index)?)
    }

    pub fn select_backend(&mut self, kind: BackendKind) -> Result<EngineEvent, SessionError> {
        self.ensure_stopped()?;
        let backend = (self.factory)(kind, &self.config)?;
        let event = self.engine.set_backend(backend)?;
        self.config.backend = kind;
        Ok(event)
    }

    /// Pick a voice for the current backend. Remote voices must come from the
    /// fixed catalogue.
    pub fn select_voice(&mut self, voice: &str) -> Result<EngineEvent, SessionError> {
        self.ensure_stopped()?;
        let kind = self.engine.backend_kind();
        let mut config = self.config.clone();
        match kind {
            BackendKind::Remote => {
                let name = REMOTE_VOICES
                    .iter()
                    .find(|name| name.eq_ignore_ascii_case(voice.trim()))
                    .ok_or_else(|| SessionError::UnknownVoice(voice.to_string()))?;
                config.remote_voice = name.to_string();
            }
            BackendKind::Device => {
                let voice = voice.trim();
                if voice.is_empty() {
                    return Err(SessionError::UnknownVoice(voice.to_string()));
                }
                config.device_voice = Some(voice.to_string());
            }
        }
        let backend = (self.factory)(kind, &config)?;
        let event = self.engine.set_backend(backend)?;
        self.config = config;
        Ok(event)
    }

    pub fn available_voices(&self) -> Vec<Voice> {
        backend::available_voices(self.engine.backend_kind(), &self.config)
    }

    fn ensure_stopped(&self) -> Result<(), SessionError> {
        let phase = self.engine.snapshot().phase;
        if phase != PlaybackPhase::Stopped {
            return Err(EngineError::BackendLocked { phase }.into());
        }
        Ok(())
    }
}
