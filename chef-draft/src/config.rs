// Configuration loading and parsing (chef-draft.toml).

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::game::chef::PlayerId;

/// Config file name under `config/` (and `defaults/`).
pub const CONFIG_FILE: &str = "chef-draft.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub player: PlayerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Identity of this client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayerConfig {
    pub id: PlayerId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub hub_url: String,
    pub debounce_ms: u64,
    pub refetch_after_hidden_secs: u64,
    /// Close the draft automatically once the last slot is filled.
    pub auto_finalize_draft: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            hub_url: "ws://127.0.0.1:9400".into(),
            debounce_ms: 100,
            refetch_after_hidden_secs: 5,
            auto_finalize_draft: true,
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn refetch_after_hidden(&self) -> Duration {
        Duration::from_secs(self.refetch_after_hidden_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            bind: "127.0.0.1".into(),
            port: 9400,
        }
    }
}

impl HubConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabaseConfig {
    /// Client snapshot store.
    #[serde(default = "default_client_db")]
    pub path: String,
    /// Hub row store.
    #[serde(default = "default_hub_db")]
    pub hub_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_client_db(),
            hub_path: default_hub_db(),
        }
    }
}

/// Database file in the platform data directory, or the working directory
/// when no home directory can be determined.
fn data_file(name: &str) -> String {
    ProjectDirs::from("", "", "chef-draft")
        .map(|dirs| dirs.data_dir().join(name))
        .unwrap_or_else(|| PathBuf::from(name))
        .to_string_lossy()
        .into_owned()
}

fn default_client_db() -> String {
    data_file("chef-draft.db")
}

fn default_hub_db() -> String {
    data_file("chef-draft-hub.db")
}

impl Config {
    /// Defaults for the given player, as if the file only named the player.
    pub fn for_player(player: PlayerId) -> Self {
        Config {
            player: PlayerConfig { id: player },
            sync: SyncConfig::default(),
            hub: HubConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Parse and validate a config document.
pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;
    validate(&config)?;
    Ok(config)
}

/// Load and validate `config/chef-draft.toml` relative to `base_dir`.
///
/// Does not copy defaults; prefer [`load_config`].
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    parse_config(&text, &path)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }

        let target = config_dir.join(file_name);
        if target.exists() {
            continue;
        }
        std::fs::copy(&path, &target).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to copy {} to {}: {e}", path.display(), target.display()),
        })?;
        copied.push(target);
    }

    Ok(copied)
}

/// Load config relative to the current working directory, copying defaults
/// first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let debounce = config.sync.debounce_ms;
    if !(1..=10_000).contains(&debounce) {
        return Err(invalid(
            "sync.debounce_ms",
            format!("must be between 1 and 10000, got {debounce}"),
        ));
    }

    let url = &config.sync.hub_url;
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(invalid(
            "sync.hub_url",
            format!("must start with ws:// or wss://, got {url:?}"),
        ));
    }

    if config.hub.port == 0 {
        return Err(invalid("hub.port", "must be greater than 0"));
    }

    for (field, value) in [
        ("database.path", &config.database.path),
        ("database.hub_path", &config.database.hub_path),
    ] {
        if value.trim().is_empty() {
            return Err(invalid(field, "must not be empty"));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
