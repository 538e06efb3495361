use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::BackendKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    #[default]
    Stopped,
    Playing,
    Paused,
    /// Synthesis in flight; no audio yet.
    Buffering,
}

impl PlaybackPhase {
    /// A chain is running and not paused.
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackPhase::Playing | PlaybackPhase::Buffering)
    }
}

impl std::fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PlaybackPhase::Stopped => "stopped",
            PlaybackPhase::Playing => "playing",
            PlaybackPhase::Paused => "paused",
            PlaybackPhase::Buffering => "buffering",
        };
        f.write_str(label)
    }
}

/// Read-only view of the playback session handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub phase: PlaybackPhase,
    pub current_index: usize,
    pub rate: f32,
    pub sentence_count: usize,
    pub backend: BackendKind,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub action: &'static str,
    pub snapshot: PlaybackSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Play,
    Pause,
    Stop,
    Jump { index: usize },
    SetRate { rate: f32 },
}

impl EngineCommand {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Jump { .. } => "jump",
            Self::SetRate { .. } => "set_rate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("sentence {index} is out of range (document has {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("backend and voice can only change while stopped (currently {phase})")]
    BackendLocked { phase: PlaybackPhase },
}
