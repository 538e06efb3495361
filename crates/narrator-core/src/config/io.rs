use super::models::NarratorConfig;
use super::tables::ConfigTables;
use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const API_KEY_ENV_VARS: [&str; 2] = ["NARRATOR_API_KEY", "GEMINI_API_KEY"];

/// Load configuration from the given path, falling back to defaults on error.
///
/// An API key missing from the file is taken from the environment.
pub fn load_config(path: &Path) -> NarratorConfig {
    let mut config = match fs::read_to_string(path) {
        Ok(contents) => {
            info!(path = %path.display(), "Loaded base config");
            match parse_config(&contents) {
                Ok(config) => {
                    debug!("Parsed configuration from disk");
                    config
                }
                Err(err) => {
                    warn!(path = %path.display(), "Invalid config TOML: {err:#}");
                    NarratorConfig::default()
                }
            }
        }
        Err(err) => {
            warn!(path = %path.display(), "Falling back to default config: {err}");
            NarratorConfig::default()
        }
    };

    if config.credential().is_none() {
        config.api_key = api_key_from_env();
        if config.api_key.is_some() {
            debug!("Using API key from environment");
        }
    }
    config
}

pub fn parse_config(contents: &str) -> Result<NarratorConfig> {
    let tables: ConfigTables = toml::from_str(contents).context("Parsing config tables")?;
    Ok(tables.into())
}

pub fn serialize_config(config: &NarratorConfig) -> Result<String> {
    toml::to_string(&ConfigTables::from(config)).context("Serializing config tables")
}

fn api_key_from_env() -> Option<String> {
    API_KEY_ENV_VARS
        .iter()
        .filter_map(|name| env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
