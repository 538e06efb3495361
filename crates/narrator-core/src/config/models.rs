use serde::{Deserialize, Serialize};

/// Flat runtime configuration; built from the grouped TOML tables.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NarratorConfig {
    #[serde(default = "crate::config::defaults::default_backend")]
    pub backend: BackendKind,
    #[serde(default = "crate::config::defaults::default_playback_rate")]
    pub playback_rate: f32,
    #[serde(default = "crate::config::defaults::default_remote_endpoint")]
    pub remote_endpoint: String,
    #[serde(default = "crate::config::defaults::default_remote_model")]
    pub remote_model: String,
    #[serde(default = "crate::config::defaults::default_remote_voice")]
    pub remote_voice: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "crate::config::defaults::default_cache_remote_audio")]
    pub cache_remote_audio: bool,
    #[serde(default = "crate::config::defaults::default_device_program")]
    pub device_program: String,
    #[serde(default)]
    pub device_voice: Option<String>,
    #[serde(default = "crate::config::defaults::default_device_language_prefix")]
    pub device_language_prefix: String,
    #[serde(default = "crate::config::defaults::default_device_settle_delay_ms")]
    pub device_settle_delay_ms: u64,
    #[serde(default = "crate::config::defaults::default_device_words_per_minute")]
    pub device_words_per_minute: u32,
    #[serde(default = "crate::config::defaults::default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "crate::config::defaults::default_log_level")]
    pub log_level: LogLevel,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        NarratorConfig {
            backend: crate::config::defaults::default_backend(),
            playback_rate: crate::config::defaults::default_playback_rate(),
            remote_endpoint: crate::config::defaults::default_remote_endpoint(),
            remote_model: crate::config::defaults::default_remote_model(),
            remote_voice: crate::config::defaults::default_remote_voice(),
            api_key: None,
            cache_remote_audio: crate::config::defaults::default_cache_remote_audio(),
            device_program: crate::config::defaults::default_device_program(),
            device_voice: None,
            device_language_prefix: crate::config::defaults::default_device_language_prefix(),
            device_settle_delay_ms: crate::config::defaults::default_device_settle_delay_ms(),
            device_words_per_minute: crate::config::defaults::default_device_words_per_minute(),
            cache_dir: crate::config::defaults::default_cache_dir(),
            log_level: crate::config::defaults::default_log_level(),
        }
    }
}

impl NarratorConfig {
    /// API key with surrounding whitespace removed; `None` when unset or blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Which speech backend drives playback.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Network synthesis; audio is fetched before it can play.
    #[default]
    Remote,
    /// The host's local speech program.
    Device,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BackendKind::Remote => "remote",
            BackendKind::Device => "device",
        };
        write!(f, "{}", label)
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "remote" | "gemini" => Ok(BackendKind::Remote),
            "device" | "local" | "browser" => Ok(BackendKind::Device),
            other => Err(format!("unknown backend '{other}' (expected remote or device)")),
        }
    }
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
