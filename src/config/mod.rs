//! Application configuration loading, validation, and management.
//!
//! The top-level [`Config`] aggregates the logger, subscriber, buffer, and
//! pipeline sections. It is loaded from a TOML file once, early in the
//! application lifecycle, and is immutable thereafter.
//!
//! ```toml
//! [logger]
//! level = "info"
//!
//! [subscriber]
//! broker_url = "tcp://broker.local:1883"
//! topics = ["sensors/+/telemetry"]
//!
//! [buffer]
//! type = "inmemory"
//!
//! [pipeline]
//! poll_interval_ms = 500
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use iotdatatunnel_mqtt::BufferSettings;
use serde::{Deserialize, Serialize};
use validator::Validate;

use self::{logger::LoggerConfig, pipeline::PipelineConfig, subscriber::SubscriberSettings};

pub mod logger;
pub mod pipeline;
pub mod subscriber;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "IOTDATATUNNEL_CONFIG";

/// Path used when [`CONFIG_ENV`] is not set.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/iotdatatunnel/config.toml";

/// Current UTC time for the `print_*` macros.
#[doc(hidden)]
pub fn timestamp() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

/// Simple macros for printing timestamped messages before the tracing subscriber
/// is initialized. These are used during early configuration loading.
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            console::style($crate::config::timestamp()).dim(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

/// Errors that can occur during configuration loading, parsing, or
/// validation.
#[derive(Debug, thiserror::Error)]
pub enum AppConfigError {
    /// Generic configuration-related error with a descriptive message.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while accessing configuration files.
    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// Failure to parse the TOML configuration file.
    #[error("Parse error while reading configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation failure after successful parsing.
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Top-level application configuration.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Logging subsystem configuration.
    #[validate(nested)]
    pub logger: LoggerConfig,

    /// Broker connection and subscriptions.
    #[validate(nested)]
    pub subscriber: SubscriberSettings,

    /// Where ingested messages are buffered.
    pub buffer: BufferSettings,

    /// Buffer draining and filter rules.
    #[validate(nested)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Constructs a new configuration by locating and loading the config file.
    ///
    /// # Errors
    ///
    /// Returns an `AppConfigError` if the configuration file cannot be found,
    /// read, parsed, or validated.
    pub fn new() -> Result<Self, AppConfigError> {
        let config_path = Self::get_config_path()?;
        Self::load(&config_path)
    }

    /// Determines the configuration file path.
    ///
    /// Priority:
    /// 1. `IOTDATATUNNEL_CONFIG` environment variable
    /// 2. `/etc/iotdatatunnel/config.toml`
    fn get_config_path() -> Result<PathBuf, AppConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Ok(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(fallback.to_path_buf());
        }

        Err(AppConfigError::Config(format!(
            "No configuration file found (set {} or create {})",
            CONFIG_ENV, DEFAULT_CONFIG_PATH
        )))
    }

    /// Loads and validates configuration from the specified path.
    ///
    /// # Errors
    ///
    /// Propagates IO, parsing, and validation errors as `AppConfigError`.
    pub fn load(path: &Path) -> Result<Config, AppConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(AppConfigError::Config(format!(
                "{} does not exist",
                path.display()
            )));
        }

        let config = Self::parse(&fs::read_to_string(path)?)?;
        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// `ParseError` for malformed TOML, `ValidationError` for values that
    /// violate a section's rules.
    pub fn parse(text: &str) -> Result<Config, AppConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use iotdatatunnel_mqtt::BufferKind;

    use super::*;
    use crate::config::pipeline::TargetKind;

    const FULL: &str = r#"
        [logger]
        level = "debug"

        [logger.console]
        format = "pretty"

        [subscriber]
        broker_url = "tcp://broker.local:1883"
        client_id = "gateway"
        topics = ["sensors/+/telemetry"]
        initial_delay_ms = 500
        max_delay_ms = 8000

        [buffer]
        type = "Redis"
        host = "cache.local"

        [pipeline]
        poll_interval_ms = 200

        [[pipeline.rules]]
        name = "temperature"
        predicates = [{ path = "$.sensor[0].type", equals = "temp" }]
        extract = ["$.sensor[0].value"]
        target = "f64"
    "#;

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.logger.level, "debug");
        assert_eq!(config.subscriber.client_id.as_deref(), Some("gateway"));
        assert_eq!(config.buffer.kind, BufferKind::Redis);
        assert_eq!(config.buffer.host, "cache.local");
        assert_eq!(config.pipeline.poll_interval_ms, 200);
        assert_eq!(config.pipeline.rules[0].target, TargetKind::F64);
    }

    #[test]
    fn test_missing_sections_take_defaults() {
        let config = Config::parse(
            r#"
            [subscriber]
            topics = ["t"]
            "#,
        )
        .unwrap();
        assert_eq!(config.subscriber.broker_url, "tcp://localhost:1883");
        assert_eq!(config.buffer.kind, BufferKind::InMemory);
        assert!(config.pipeline.rules.is_empty());
        assert_eq!(config.logger.level, "info");
    }

    #[test]
    fn test_validation_failures_are_reported() {
        let result = Config::parse("[subscriber]\ntopics = []\n");
        assert!(matches!(result, Err(AppConfigError::ValidationError(_))));

        let result = Config::parse("[logger]\nlevel = \"loud\"\n[subscriber]\ntopics = [\"t\"]\n");
        assert!(matches!(result, Err(AppConfigError::ValidationError(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = Config::parse("[subscriber\n");
        assert!(matches!(result, Err(AppConfigError::ParseError(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(AppConfigError::Config(_))));
    }
}
