//! Speech backends.
//!
//! The engine only talks to [`SpeechBackend`]; the concrete variants are
//! [`RemoteBackend`] (network synthesis, buffers before audio starts) and
//! [`DeviceBackend`] (the host speech program). Both play through the shared
//! [`AudioOutput`] slot.

mod device;
mod output;
mod remote;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::cancellation::CancellationToken;
pub use crate::config::BackendKind;
use crate::config::NarratorConfig;

pub use device::{DeviceBackend, DeviceVoice, list_voices, parse_voice_list, words_per_minute};
pub use output::{AudioOutput, OutputError, PcmAudio};
pub use remote::{REMOTE_VOICES, RemoteBackend};

/// One sentence to speak at a given rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub rate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{0}")]
    InvalidCredential(String),
    #[error("{0}")]
    SynthesisFailed(String),
    #[error("Speech failed for one sentence: {0}")]
    Utterance(String),
    #[error("{0}")]
    VoiceUnavailable(String),
}

impl BackendError {
    /// Fatal errors stop playback; the rest are skipped like a completion.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BackendError::Utterance(_))
    }
}

/// A selectable voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub id: String,
    pub label: String,
}

pub trait SpeechBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether synthesis happens before audio starts.
    fn buffers(&self) -> bool;

    /// Speak one sentence, blocking until it finished or was cancelled.
    ///
    /// `on_audible` runs once when sound starts and never after `cancel` has
    /// been triggered.
    fn speak(
        &self,
        utterance: &Utterance,
        cancel: &CancellationToken,
        on_audible: &mut dyn FnMut(),
    ) -> Result<SpeakOutcome, BackendError>;

    fn pause(&self);

    fn resume(&self);

    /// Stop whatever is in flight. A no-op when idle.
    fn cancel(&self);

    /// Best effort; may only apply from the next sentence.
    fn set_rate(&self, rate: f32);
}

/// Build the backend for `kind` from the current configuration.
pub fn create_backend(
    kind: BackendKind,
    config: &NarratorConfig,
) -> Result<Arc<dyn SpeechBackend>, BackendError> {
    info!(backend = %kind, "Creating speech backend");
    let backend: Arc<dyn SpeechBackend> = match kind {
        BackendKind::Remote => Arc::new(RemoteBackend::new(config)?),
        BackendKind::Device => {
            let voice = config.device_voice.clone().or_else(|| {
                first_device_voice(config).map(|voice| {
                    info!(voice = %voice.identifier, "Picked default device voice");
                    voice.identifier
                })
            });
            Arc::new(DeviceBackend::new(config, voice))
        }
    };
    Ok(backend)
}

/// Voices the user can pick for `kind`.
pub fn available_voices(kind: BackendKind, config: &NarratorConfig) -> Vec<Voice> {
    match kind {
        BackendKind::Remote => REMOTE_VOICES
            .iter()
            .map(|name| Voice {
                id: name.to_string(),
                label: name.to_string(),
            })
            .collect(),
        BackendKind::Device => {
            match list_voices(&config.device_program, &config.device_language_prefix) {
                Ok(voices) => voices
                    .into_iter()
                    .map(|voice| Voice {
                        label: format!("{} ({})", voice.name, voice.language),
                        id: voice.identifier,
                    })
                    .collect(),
                Err(err) => {
                    warn!("Failed to list device voices: {err:#}");
                    Vec::new()
                }
            }
        }
    }
}

fn first_device_voice(config: &NarratorConfig) -> Option<DeviceVoice> {
    match list_voices(&config.device_program, &config.device_language_prefix) {
        Ok(voices) => voices.into_iter().next(),
        Err(err) => {
            warn!("Failed to list device voices: {err:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_utterance_errors_are_recoverable() {
        assert!(!BackendError::Utterance("boom".into()).is_fatal());
        assert!(BackendError::InvalidCredential("bad key".into()).is_fatal());
        assert!(BackendError::SynthesisFailed("offline".into()).is_fatal());
        assert!(BackendError::VoiceUnavailable("none".into()).is_fatal());
    }

    #[test]
    fn remote_catalogue_is_fixed() {
        let ids: Vec<String> = available_voices(BackendKind::Remote, &NarratorConfig::default())
            .into_iter()
            .map(|voice| voice.id)
            .collect();
        assert_eq!(ids, vec!["Kore", "Puck", "Charon", "Fenrir", "Zephyr"]);
    }

    #[test]
    fn errors_render_user_facing_text() {
        let err = BackendError::InvalidCredential(
            "The provided API key is not valid. Please check it and try again.".into(),
        );
        assert_eq!(
            err.to_string(),
            "The provided API key is not valid. Please check it and try again."
        );
        assert_eq!(
            BackendError::Utterance("exit status 1".into()).to_string(),
            "Speech failed for one sentence: exit status 1"
        );
    }
}
