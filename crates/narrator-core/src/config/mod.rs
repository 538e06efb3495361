//! Configuration loading for the narrator.
//!
//! All user-tunable settings are centralized here and loaded from
//! `conf/config.toml` if present. Any missing or invalid entries fall back to
//! sensible defaults so playback can still start.

mod defaults;
mod io;
mod models;
mod tables;

pub use defaults::{MAX_PLAYBACK_RATE, MIN_PLAYBACK_RATE, PLAYBACK_SPEEDS, clamp_rate};
pub use io::{load_config, parse_config, serialize_config};
pub use models::{BackendKind, LogLevel, NarratorConfig};
