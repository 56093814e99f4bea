//! Configuration system: layered loading of defaults, an optional TOML
//! file (global XDG location or explicit path), and `GROVE_*`
//! environment overrides.

use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use crate::pull::PullLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Push engine tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushTunables {
    /// Debounce window coalescing rapid edits into one flush
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    100
}

impl Default for PushTunables {
    fn default() -> Self {
        PushTunables {
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroveConfig {
    #[serde(default)]
    pub pull: PullLimits,

    #[serde(default)]
    pub push: PushTunables,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GroveConfig {
    /// Load configuration with the standard precedence:
    /// defaults < global config file < explicit file < environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(global) = global_config_path() {
            if global.exists() {
                builder = builder.add_source(config::File::from(global));
            }
        }
        if let Some(path) = explicit {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("GROVE")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(format!("failed to render config: {}", e)))
    }
}

/// XDG location of the global config file (`.../grove/config.toml`)
pub fn global_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "grove")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
