//! Configuration management for moa
//!
//! A single immutable [`Config`] value is loaded once per run and handed to
//! the components that need it. Every section has defaults, so an empty file
//! is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::logging::LogFormat;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub sync: SyncConfig,
    pub limits: LimitsConfig,
    pub retry: RetryConfig,
    pub defer: DeferConfig,
    pub media: MediaConfig,
    pub notifications: NotificationsConfig,
    pub logging: LogSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/moa/moa.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Newest items kept per network per bridge and run
    pub max_messages_per_run: usize,
    /// Wall-clock budget for one run, checked between bridges
    pub run_budget_secs: u64,
    /// When false the run is a dry run: nothing remote or local is mutated
    pub send: bool,
    /// Sentinel file whose presence pauses the worker between bridges
    pub stop_file: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_messages_per_run: 5,
            run_budget_secs: 270,
            send: true,
            stop_file: "worker_stop".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Items older than this many hours are never cross-posted
    pub hour_cutoff: i64,
    pub sanitize_twitter_handles: bool,
    /// Appended to Twitter mentions when they are posted to Mastodon
    pub twitter_mention_suffix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hour_cutoff: 8,
            sanitize_twitter_handles: true,
            twitter_mention_suffix: "@twitter.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub tweet_length: usize,
    pub toot_length: usize,
    /// Length Twitter bills for any URL, regardless of its real length
    pub twitter_url_length: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            tweet_length: 280,
            toot_length: 500,
            twitter_url_length: 23,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferConfig {
    pub window_minutes: i64,
    /// Consecutive deferrals after which bridges on the host are disabled
    pub strike_threshold: u32,
}

impl Default for DeferConfig {
    fn default() -> Self {
        Self {
            window_minutes: 30,
            strike_threshold: 48,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub max_video_bytes: u64,
    /// Downloads larger than this are abandoned
    pub max_download_bytes: u64,
    pub timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_video_bytes: 8 * 1024 * 1024,
            max_download_bytes: 16 * 1024 * 1024,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub notify_deferred: bool,
    pub notify_defer_failed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub format: LogFormat,
    /// `EnvFilter` directive, e.g. `info` or `libmoa=debug`
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("worker.max_messages_per_run", self.worker.max_messages_per_run as u64),
            ("retry.attempts", self.retry.attempts as u64),
            ("limits.tweet_length", self.limits.tweet_length as u64),
            ("limits.toot_length", self.limits.toot_length as u64),
            ("defer.strike_threshold", self.defer.strike_threshold as u64),
            ("media.max_download_bytes", self.media.max_download_bytes),
        ];

        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                }
                .into());
            }
        }

        if self.defer.window_minutes <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "defer.window_minutes".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Database path with `~` expanded
    pub fn database_path(&self) -> String {
        shellexpand::tilde(&self.database.path).to_string()
    }
}

/// Resolve the configuration file path (`MOA_CONFIG`, then the XDG config dir)
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("MOA_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("moa").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MoaError;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.worker.max_messages_per_run, 5);
        assert_eq!(config.worker.run_budget(), Duration::from_secs(270));
        assert!(config.worker.send);
        assert_eq!(config.sync.hour_cutoff, 8);
        assert_eq!(config.limits.tweet_length, 280);
        assert_eq!(config.limits.twitter_url_length, 23);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.media.max_video_bytes, 8 * 1024 * 1024);
        assert_eq!(config.media.max_download_bytes, 16 * 1024 * 1024);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [worker]
            send = false

            [retry]
            delay_secs = 1
            "#,
        )
        .unwrap();

        assert!(!config.worker.send);
        assert_eq!(config.worker.max_messages_per_run, 5);
        assert_eq!(config.retry.delay_secs, 1);
        assert_eq!(config.retry.attempts, 3);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = Config::from_toml("[retry]\nattempts = 0\n");

        match result {
            Err(MoaError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "retry.attempts");
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let result = Config::from_toml("[worker\nsend = ");
        assert!(matches!(
            result,
            Err(MoaError::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    fn test_load_from_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[database]\npath = \"/tmp/moa-test.db\"\n").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.database_path(), "/tmp/moa-test.db");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = Config::load_from_path(&temp_dir.path().join("absent.toml"));
        assert!(matches!(
            result,
            Err(MoaError::Config(ConfigError::ReadError(_)))
        ));
    }

    #[test]
    #[serial]
    fn test_config_path_env_override() {
        std::env::set_var("MOA_CONFIG", "/etc/moa/custom.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("MOA_CONFIG");

        assert_eq!(path, PathBuf::from("/etc/moa/custom.toml"));
    }
}
