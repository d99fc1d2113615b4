use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::chatbot::kernel::ProcessSettings;

/// Environment variables that override file values.
pub const ENV_CHANNEL_ID: &str = "CATHY_CHANNEL_ID";
pub const ENV_BOT_TOKEN: &str = "CATHY_BOT_TOKEN";
pub const ENV_DATABASE: &str = "CATHY_DATABASE";
pub const ENV_ENGINE_COMMAND: &str = "CATHY_ENGINE_COMMAND";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {var} '{value}': expected an integer chat id")]
    InvalidChannelId { var: &'static str, value: String },
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    channel_id: Option<i64>,
    #[serde(default)]
    bot_token: String,
    /// Path of the SQLite file.
    #[serde(default)]
    database_path: Option<String>,
    /// Directory for logs. Defaults to current directory.
    #[serde(default)]
    data_dir: Option<String>,
    #[serde(default)]
    engine: EngineFile,
    /// Persona overrides, merged over the built-in predicates.
    #[serde(default)]
    predicates: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct EngineFile {
    #[serde(default)]
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default = "default_resource_dir")]
    resource_dir: String,
    #[serde(default = "default_startup_file")]
    startup_file: String,
}

impl Default for EngineFile {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            resource_dir: default_resource_dir(),
            startup_file: default_startup_file(),
        }
    }
}

fn default_resource_dir() -> String {
    "resources".to_string()
}

fn default_startup_file() -> String {
    "std-startup.xml".to_string()
}

pub struct Config {
    /// Config file this was loaded from, if any.
    pub config_path: Option<PathBuf>,
    /// The only channel the bot talks in.
    pub channel_id: i64,
    pub bot_token: String,
    pub database_path: PathBuf,
    /// Directory for state files (logs).
    pub data_dir: PathBuf,
    pub engine: ProcessSettings,
    pub predicates: BTreeMap<String, String>,
}

impl Config {
    /// Load a JSON config file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Build the config from environment variables alone.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(ConfigFile::default(), None, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<P, E>(path: P, env: E) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        E: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadFile {
            path: config_path.clone(),
            source: e,
        })?;
        let file: ConfigFile = serde_json::from_str(&content).map_err(|e| ConfigError::ParseJson {
            path: config_path.clone(),
            source: e,
        })?;
        Self::resolve(file, Some(config_path), env)
    }

    fn resolve<E>(mut file: ConfigFile, config_path: Option<PathBuf>, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        if let Some(value) = env(ENV_CHANNEL_ID) {
            let id = value.trim().parse::<i64>().map_err(|_| ConfigError::InvalidChannelId {
                var: ENV_CHANNEL_ID,
                value: value.clone(),
            })?;
            file.channel_id = Some(id);
        }
        if let Some(value) = env(ENV_BOT_TOKEN) {
            file.bot_token = value;
        }
        if let Some(value) = env(ENV_DATABASE) {
            file.database_path = Some(value);
        }
        if let Some(value) = env(ENV_ENGINE_COMMAND) {
            file.engine.command = value;
        }

        let channel_id = match file.channel_id {
            Some(0) | None => {
                return Err(ConfigError::Validation("channel_id is required".into()));
            }
            Some(id) => id,
        };

        if file.bot_token.is_empty() {
            return Err(ConfigError::Validation("bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }

        let database_path = match file.database_path {
            Some(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => return Err(ConfigError::Validation("database_path is required".into())),
        };

        if file.engine.command.trim().is_empty() {
            return Err(ConfigError::Validation("engine.command is required".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            config_path,
            channel_id,
            bot_token: file.bot_token,
            database_path,
            data_dir,
            engine: ProcessSettings {
                command: file.engine.command,
                args: file.engine.args,
                working_dir: PathBuf::from(file.engine.resource_dir),
                startup_file: PathBuf::from(file.engine.startup_file),
            },
            predicates: file.predicates,
        })
    }
}
