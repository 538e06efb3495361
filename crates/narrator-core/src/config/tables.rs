use super::defaults;
use super::models::{BackendKind, LogLevel, NarratorConfig};
use serde::Deserialize;

/// On-disk layout of `config.toml`, grouped by concern.
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub(super) struct ConfigTables {
    #[serde(default)]
    playback: PlaybackConfig,
    #[serde(default)]
    remote: RemoteConfig,
    #[serde(default)]
    device: DeviceConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

impl From<ConfigTables> for NarratorConfig {
    fn from(tables: ConfigTables) -> Self {
        NarratorConfig {
            backend: tables.playback.backend,
            playback_rate: defaults::clamp_rate(tables.playback.rate),
            remote_endpoint: tables.remote.endpoint,
            remote_model: tables.remote.model,
            remote_voice: tables.remote.voice,
            api_key: tables.remote.api_key,
            cache_remote_audio: tables.remote.cache_audio,
            device_program: tables.device.program,
            device_voice: tables.device.voice,
            device_language_prefix: tables.device.language_prefix,
            device_settle_delay_ms: tables.device.settle_delay_ms,
            device_words_per_minute: tables.device.words_per_minute,
            cache_dir: tables.storage.cache_dir,
            log_level: tables.logging.log_level,
        }
    }
}

impl From<&NarratorConfig> for ConfigTables {
    fn from(config: &NarratorConfig) -> Self {
        ConfigTables {
            playback: PlaybackConfig {
                backend: config.backend,
                rate: config.playback_rate,
            },
            remote: RemoteConfig {
                endpoint: config.remote_endpoint.clone(),
                model: config.remote_model.clone(),
                voice: config.remote_voice.clone(),
                api_key: config.api_key.clone(),
                cache_audio: config.cache_remote_audio,
            },
            device: DeviceConfig {
                program: config.device_program.clone(),
                voice: config.device_voice.clone(),
                language_prefix: config.device_language_prefix.clone(),
                settle_delay_ms: config.device_settle_delay_ms,
                words_per_minute: config.device_words_per_minute,
            },
            storage: StorageConfig {
                cache_dir: config.cache_dir.clone(),
            },
            logging: LoggingConfig {
                log_level: config.log_level,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct PlaybackConfig {
    #[serde(default = "defaults::default_backend")]
    backend: BackendKind,
    #[serde(default = "defaults::default_playback_rate")]
    rate: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        PlaybackConfig {
            backend: defaults::default_backend(),
            rate: defaults::default_playback_rate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct RemoteConfig {
    #[serde(default = "defaults::default_remote_endpoint")]
    endpoint: String,
    #[serde(default = "defaults::default_remote_model")]
    model: String,
    #[serde(default = "defaults::default_remote_voice")]
    voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(default = "defaults::default_cache_remote_audio")]
    cache_audio: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            endpoint: defaults::default_remote_endpoint(),
            model: defaults::default_remote_model(),
            voice: defaults::default_remote_voice(),
            api_key: None,
            cache_audio: defaults::default_cache_remote_audio(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct DeviceConfig {
    #[serde(default = "defaults::default_device_program")]
    program: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    voice: Option<String>,
    #[serde(default = "defaults::default_device_language_prefix")]
    language_prefix: String,
    #[serde(default = "defaults::default_device_settle_delay_ms")]
    settle_delay_ms: u64,
    #[serde(default = "defaults::default_device_words_per_minute")]
    words_per_minute: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            program: defaults::default_device_program(),
            voice: None,
            language_prefix: defaults::default_device_language_prefix(),
            settle_delay_ms: defaults::default_device_settle_delay_ms(),
            words_per_minute: defaults::default_device_words_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct StorageConfig {
    #[serde(default = "defaults::default_cache_dir")]
    cache_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            cache_dir: defaults::default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    log_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: defaults::default_log_level(),
        }
    }
}
