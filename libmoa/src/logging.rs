//! Logging setup for moa workers
//!
//! The format and level come from the `[logging]` section of the
//! configuration; `MOA_LOG_FORMAT` and `MOA_LOG_LEVEL` override it for a
//! single run, and `RUST_LOG` overrides the level entirely. Workers run
//! unattended, so JSON is the production format. Every event emitted while
//! a bridge is processed carries the `bridge` span with its id.
//!
//! ```no_run
//! use libmoa::config::Config;
//! use libmoa::logging::LoggingConfig;
//!
//! # fn main() -> libmoa::error::Result<()> {
//! let config = Config::load()?;
//! LoggingConfig::from_config(&config).with_env_overrides().init();
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One object per line, span fields flattened in
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: impl Into<String>) -> Self {
        Self {
            format,
            level: level.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.logging.format, config.logging.level.clone())
    }

    /// Apply `MOA_LOG_FORMAT` and `MOA_LOG_LEVEL` when they are set
    ///
    /// An unrecognized format is ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(format) = std::env::var("MOA_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.format = format;
        }

        if let Ok(level) = std::env::var("MOA_LOG_LEVEL") {
            if !level.trim().is_empty() {
                self.level = level;
            }
        }

        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    /// Install the global subscriber
    ///
    /// Returns false when a subscriber was already installed, which happens
    /// when several workers share a process in tests.
    pub fn init(&self) -> bool {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_writer(std::io::stderr);

        let installed = match self.format {
            LogFormat::Json => builder
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true)
                .try_init(),
            LogFormat::Pretty => builder.pretty().with_target(true).try_init(),
            LogFormat::Text => builder.with_target(false).try_init(),
        };

        installed.is_ok()
    }
}

/// Initialize logging from defaults and the environment alone
pub fn init_default() -> bool {
    LoggingConfig::from_config(&Config::default_config())
        .with_env_overrides()
        .init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("syslog"
            .parse::<LogFormat>()
            .unwrap_err()
            .contains("Invalid log format: 'syslog'"));
    }

    #[test]
    fn test_from_config_section() {
        let config = Config::from_toml("[logging]\nformat = \"json\"\nlevel = \"libmoa=debug\"\n")
            .unwrap();
        let logging = LoggingConfig::from_config(&config);

        assert_eq!(logging, LoggingConfig::new(LogFormat::Json, "libmoa=debug"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_config() {
        std::env::set_var("MOA_LOG_FORMAT", "pretty");
        std::env::set_var("MOA_LOG_LEVEL", "warn");
        let logging = LoggingConfig::new(LogFormat::Json, "info").with_env_overrides();
        std::env::remove_var("MOA_LOG_FORMAT");
        std::env::remove_var("MOA_LOG_LEVEL");

        assert_eq!(logging, LoggingConfig::new(LogFormat::Pretty, "warn"));
    }

    #[test]
    #[serial]
    fn test_bad_env_format_keeps_config() {
        std::env::set_var("MOA_LOG_FORMAT", "xml");
        std::env::remove_var("MOA_LOG_LEVEL");
        let logging = LoggingConfig::new(LogFormat::Json, "info").with_env_overrides();
        std::env::remove_var("MOA_LOG_FORMAT");

        assert_eq!(logging, LoggingConfig::new(LogFormat::Json, "info"));
    }

    #[test]
    fn test_second_init_is_refused() {
        let logging = LoggingConfig::new(LogFormat::Text, "off");
        logging.init();
        assert!(!logging.init());
    }
}
