// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration management for the agent.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "EQSWITCH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("No config directory found")]
    NoConfigDir,
}

/// Audio server tooling used during bring-up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Server binary, invoked with `--check` to test availability.
    #[serde(default = "default_server_binary")]
    pub binary: String,
    /// `pactl` binary used to list and load modules.
    #[serde(default = "default_pactl")]
    pub pactl: String,
    /// Module providing the D-Bus control protocol.
    #[serde(default = "default_module")]
    pub module: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            binary: default_server_binary(),
            pactl: default_pactl(),
            module: default_module(),
        }
    }
}

fn default_server_binary() -> String {
    "pulseaudio".to_string()
}

fn default_pactl() -> String {
    "pactl".to_string()
}

fn default_module() -> String {
    "module-dbus-protocol".to_string()
}

/// External equalizer engine commands.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EqualizerConfig {
    #[serde(default = "default_equalizer_program")]
    pub program: String,
    /// Arguments making the engine write its live settings to the live path.
    #[serde(default = "default_dump_args")]
    pub dump_args: Vec<String>,
    /// Arguments making the engine reload settings from the live path.
    #[serde(default = "default_apply_args")]
    pub apply_args: Vec<String>,
}

impl Default for EqualizerConfig {
    fn default() -> Self {
        Self {
            program: default_equalizer_program(),
            dump_args: default_dump_args(),
            apply_args: default_apply_args(),
        }
    }
}

fn default_equalizer_program() -> String {
    "pulseaudio-equalizer".to_string()
}

fn default_dump_args() -> Vec<String> {
    vec!["interface.getsettings".to_string()]
}

fn default_apply_args() -> Vec<String> {
    vec!["interface.applysettings".to_string()]
}

fn default_retry_interval_ms() -> u64 {
    1000
}

/// Complete agent configuration.
///
/// Path fields left out of the file are filled from the user's
/// configuration home by [`ConfigManager::load`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentConfig {
    /// Root of the per-device/per-port profile tree.
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
    /// Fixed path the equalizer engine reads and writes.
    #[serde(default)]
    pub live_config: Option<PathBuf>,
    /// Delay between availability polls.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub equalizer: EqualizerConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            profile_dir: None,
            live_config: None,
            retry_interval_ms: default_retry_interval_ms(),
            server: ServerConfig::default(),
            equalizer: EqualizerConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Fill unset paths relative to `config_home` (usually `~/.config`).
    pub fn resolve_paths(&mut self, config_home: &Path) {
        if self.profile_dir.is_none() {
            self.profile_dir = Some(config_home.join("eqswitch").join("profiles"));
        }
        if self.live_config.is_none() {
            self.live_config = Some(config_home.join("pulse").join("equalizerrc"));
        }
    }
}

/// Configuration manager handles locating and loading the config file.
pub struct ConfigManager {
    config_home: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a config manager rooted at the user's configuration home.
    ///
    /// `EQSWITCH_CONFIG` overrides the config file path.
    pub fn new() -> Result<Self, ConfigError> {
        let base = directories::BaseDirs::new().ok_or(ConfigError::NoConfigDir)?;
        let config_home = base.config_dir().to_path_buf();

        let config_path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => directories::ProjectDirs::from("", "", "eqswitch")
                .map(|d| d.config_dir().join("config.toml"))
                .ok_or(ConfigError::NoConfigDir)?,
        };

        debug!("Config file: {:?}", config_path);
        Ok(Self {
            config_home,
            config_path,
        })
    }

    /// Create a config manager with explicit locations.
    pub fn with_paths(config_home: PathBuf, config_path: PathBuf) -> Self {
        Self {
            config_home,
            config_path,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the agent configuration, with every path resolved.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(&self) -> Result<AgentConfig, ConfigError> {
        let mut config = if self.config_path.exists() {
            let content = fs::read_to_string(&self.config_path)?;
            let config = AgentConfig::from_toml(&content)?;
            info!("Loaded config from {:?}", self.config_path);
            config
        } else {
            debug!("No config file found, using defaults");
            AgentConfig::default()
        };

        config.resolve_paths(&self.config_home);
        Ok(config)
    }
}
