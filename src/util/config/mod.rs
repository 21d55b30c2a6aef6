//! luahost configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Environment variables (LUAHOST_LOG)
//! 3. Explicit config file (--config)
//! 4. User-level (~/.config/luahost/config.toml)
//! 5. Default values
//! ```
//!
//! # Example
//!
//! ```toml
//! [bridge]
//! fault_policy = "exit"
//! dispatch_miss = "raise"
//! chunk_mode = "text"
//!
//! [log]
//! level = "debug"
//! ```

use std::ffi::CStr;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::logger::LogLevel;

/// Environment variable overriding the log level
pub const LOG_ENV: &str = "LUAHOST_LOG";

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Per-interpreter bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Open the Lua standard libraries at construction
    #[serde(default = "default_open_std_libs")]
    pub open_std_libs: bool,
    /// What a failed protected call or load does
    #[serde(default)]
    pub fault_policy: FaultPolicy,
    /// What the trampoline does with an unknown closure id
    #[serde(default)]
    pub dispatch_miss: DispatchMiss,
    /// Which chunk encodings the loaders accept
    #[serde(default)]
    pub chunk_mode: ChunkMode,
    /// Also publish the raw trampoline under this global name
    #[serde(default)]
    pub trampoline_global: Option<String>,
}

fn default_open_std_libs() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            open_std_libs: true,
            fault_policy: FaultPolicy::default(),
            dispatch_miss: DispatchMiss::default(),
            chunk_mode: ChunkMode::default(),
            trampoline_global: None,
        }
    }
}

/// Failure policy for calls into Lua
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Return the diagnostic as an error
    #[default]
    Propagate,
    /// Print the diagnostic and terminate the process
    Exit,
}

/// Policy for closure ids missing from the closure table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMiss {
    /// Return no results
    #[default]
    Ignore,
    /// Raise a Lua error
    Raise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMode {
    Text,
    Binary,
    #[default]
    TextAndBinary,
}

impl ChunkMode {
    /// Mode string for `luaL_loadbufferx`
    pub fn as_cstr(self) -> &'static CStr {
        match self {
            ChunkMode::Text => c"t",
            ChunkMode::Binary => c"b",
            ChunkMode::TextAndBinary => c"bt",
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
        }
    }
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("luahost"));
    }

    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("luahost"));
    }

    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("luahost"));
    }

    None
}

/// Get the user config file path (~/.config/luahost/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Parse a configuration from TOML text
pub fn parse_config(content: &str) -> Result<HostConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Load configuration from `path`, or from the user config file when no path
/// is given. A missing user config yields defaults; a missing explicit path is
/// an error. `LUAHOST_LOG` is applied last.
pub fn load_config(path: Option<&Path>) -> Result<HostConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => match get_config_path() {
            Some(user) if user.exists() => read_config(&user)?,
            _ => HostConfig::default(),
        },
    };

    if let Ok(level) = std::env::var(LOG_ENV) {
        config.log.level = level.parse().map_err(ConfigError::InvalidEnv)?;
    }

    Ok(config)
}

fn read_config(path: &Path) -> Result<HostConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid LUAHOST_LOG value: {0}")]
    InvalidEnv(String),
}
