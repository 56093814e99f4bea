//! Structured logging via `tracing`, with configurable level, format,
//! and destination. Environment variables (`GROVE_LOG`,
//! `GROVE_LOG_FORMAT`, `GROVE_LOG_OUTPUT`) override the configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format: text or json
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout or file
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path (when output is "file")
    #[serde(default = "default_file")]
    pub file: PathBuf,

    /// Colored output (text format, stdout only)
    #[serde(default = "default_color")]
    pub color: bool,

    /// Module-specific log levels
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stdout".to_string()
}

fn default_file() -> PathBuf {
    PathBuf::from(".grove/grove.log")
}

fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            output: default_output(),
            file: default_file(),
            color: default_color(),
            modules: HashMap::new(),
        }
    }
}

/// Initialize the logging system.
///
/// Precedence, highest first: environment variables, the passed config,
/// defaults. Safe to call once per process.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), ConfigError> {
    let filter = build_filter(config)?;
    let format = resolve("GROVE_LOG_FORMAT", config.map(|c| c.format.as_str()), "text");
    let output = resolve("GROVE_LOG_OUTPUT", config.map(|c| c.output.as_str()), "stdout");
    let use_color = config.map(|c| c.color).unwrap_or(true);

    if !matches!(format.as_str(), "text" | "json") {
        return Err(ConfigError::Invalid(format!(
            "invalid log format: {} (must be 'text' or 'json')",
            format
        )));
    }

    let base = Registry::default().with(filter);

    match output.as_str() {
        "file" => {
            let path = config.map(|c| c.file.clone()).unwrap_or_else(default_file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ConfigError::Invalid(format!("failed to create log directory: {}", e))
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| {
                    ConfigError::Invalid(format!("failed to open log file {:?}: {}", path, e))
                })?;
            if format == "json" {
                base.with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_writer(file),
                )
                .init();
            } else {
                base.with(
                    fmt::layer()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_ansi(false)
                        .with_writer(file),
                )
                .init();
            }
        }
        "stdout" => {
            if format == "json" {
                base.with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_writer(std::io::stdout),
                )
                .init();
            } else {
                base.with(
                    fmt::layer()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_ansi(use_color)
                        .with_writer(std::io::stdout),
                )
                .init();
            }
        }
        other => {
            return Err(ConfigError::Invalid(format!(
                "invalid log output: {} (must be 'stdout' or 'file')",
                other
            )));
        }
    }

    Ok(())
}

fn resolve(env: &str, configured: Option<&str>, fallback: &str) -> String {
    std::env::var(env)
        .ok()
        .or_else(|| configured.map(|s| s.to_string()))
        .unwrap_or_else(|| fallback.to_string())
}

fn build_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_env("GROVE_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    let mut filter = EnvFilter::new(level);

    if let Some(config) = config {
        for (module, module_level) in &config.modules {
            let directive = format!("{}={}", module, module_level);
            filter = filter.add_directive(directive.parse().map_err(|e| {
                ConfigError::Invalid(format!("invalid log directive {:?}: {}", directive, e))
            })?);
        }
    }

    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "text");
        assert_eq!(config.output, "stdout");
        assert!(config.color);
    }

    #[test]
    fn test_resolve_prefers_configured_over_fallback() {
        assert_eq!(
            resolve("GROVE_TEST_UNSET_VAR", Some("json"), "text"),
            "json"
        );
        assert_eq!(resolve("GROVE_TEST_UNSET_VAR", None, "text"), "text");
    }

    #[test]
    fn test_build_filter_rejects_bad_directive() {
        let mut config = LoggingConfig::default();
        config
            .modules
            .insert("grove::pull".to_string(), "not a level!!".to_string());
        assert!(build_filter(Some(&config)).is_err());
    }
}
