use super::models::{BackendKind, LogLevel};

/// Slowest playback rate accepted by the engine.
pub const MIN_PLAYBACK_RATE: f32 = 0.5;
/// Fastest playback rate accepted by the engine.
pub const MAX_PLAYBACK_RATE: f32 = 2.0;
/// Preset rates offered to the user.
pub const PLAYBACK_SPEEDS: [f32; 5] = [0.75, 1.0, 1.25, 1.5, 2.0];

pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_finite() {
        rate.clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE)
    } else {
        default_playback_rate()
    }
}

pub(crate) fn default_backend() -> BackendKind {
    BackendKind::Remote
}

pub(crate) fn default_playback_rate() -> f32 {
    1.0
}

pub(crate) fn default_remote_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

pub(crate) fn default_remote_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

pub(crate) fn default_remote_voice() -> String {
    "Kore".to_string()
}

pub(crate) fn default_cache_remote_audio() -> bool {
    true
}

pub(crate) fn default_device_program() -> String {
    "espeak-ng".to_string()
}

pub(crate) fn default_device_language_prefix() -> String {
    "en".to_string()
}

pub(crate) fn default_device_settle_delay_ms() -> u64 {
    100
}

pub(crate) fn default_device_words_per_minute() -> u32 {
    175
}

pub(crate) fn default_cache_dir() -> String {
    ".cache".to_string()
}

pub(crate) fn default_log_level() -> LogLevel {
    LogLevel::Info
}
