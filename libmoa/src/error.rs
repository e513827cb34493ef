//! Error types for moa

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MoaError>;

#[derive(Error, Debug)]
pub enum MoaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MoaError {
    /// The platform error carried by this error, if any
    pub fn platform(&self) -> Option<&PlatformError> {
        match self {
            MoaError::Platform(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// Errors surfaced by a social network port
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate content: {0}")]
    Duplicate(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

/// Substrings a Mastodon instance uses when it refuses the account itself,
/// for adapters that can only report free text.
const ACCOUNT_REJECTION_MARKERS: &[&str] = &["revoked", "unauthorized", "forbidden"];

impl PlatformError {
    /// Network hiccups, server errors and rate limits can succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Network(_) | PlatformError::RateLimit(_) | PlatformError::Server(_)
        )
    }

    /// Whether retrying can never succeed for the owning bridge
    ///
    /// Only typed auth and not-found failures qualify. Rejected content
    /// (`Posting`, `Validation`) costs the item, never the bridge.
    pub fn is_permanent_for_bridge(&self) -> bool {
        matches!(
            self,
            PlatformError::Authentication(_) | PlatformError::NotFound(_)
        )
    }

    /// Whether a timeline fetch failed because the instance refused the account
    ///
    /// Extends [`is_permanent_for_bridge`](Self::is_permanent_for_bridge) with
    /// account markers in server text. DNS and connection failures never match.
    pub fn is_account_rejection(&self) -> bool {
        if self.is_permanent_for_bridge() {
            return true;
        }

        match self {
            PlatformError::Server(msg) => {
                let lower = msg.to_lowercase();
                ACCOUNT_REJECTION_MARKERS
                    .iter()
                    .any(|marker| lower.contains(marker))
            }
            _ => false,
        }
    }
}

/// Errors raised while moving media between networks
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Transient media failure: {0}")]
    Transient(String),

    #[error("Media rejected: {0}")]
    Rejected(String),

    #[error("Media IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for MediaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() || err.is_body() {
            MediaError::Transient(err.to_string())
        } else {
            MediaError::Rejected(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PlatformError::Network("reset".to_string()).is_transient());
        assert!(PlatformError::RateLimit("slow down".to_string()).is_transient());
        assert!(PlatformError::Server("502".to_string()).is_transient());
        assert!(!PlatformError::Authentication("nope".to_string()).is_transient());
        assert!(!PlatformError::Duplicate("again".to_string()).is_transient());
        assert!(!PlatformError::Validation("too long".to_string()).is_transient());
    }

    #[test]
    fn test_permanent_for_bridge_by_variant() {
        assert!(PlatformError::Authentication("revoked".to_string()).is_permanent_for_bridge());
        assert!(PlatformError::NotFound("account".to_string()).is_permanent_for_bridge());
        assert!(!PlatformError::Validation("too long".to_string()).is_permanent_for_bridge());
        assert!(!PlatformError::RateLimit("429".to_string()).is_permanent_for_bridge());
    }

    #[test]
    fn test_message_text_never_disables_on_its_own() {
        let dns = PlatformError::Network(
            "error sending request: dns error: Name or service not known".to_string(),
        );
        assert!(!dns.is_permanent_for_bridge());
        assert!(!dns.is_account_rejection());
        assert!(dns.is_transient());

        let too_long =
            PlatformError::Posting("400 Bad Request: Text character limit exceeded".to_string());
        assert!(!too_long.is_permanent_for_bridge());

        let invalid = PlatformError::Posting("422 Validation failed: Text is invalid".to_string());
        assert!(!invalid.is_permanent_for_bridge());
        assert!(!invalid.is_account_rejection());
    }

    #[test]
    fn test_account_rejection_by_server_text() {
        assert!(PlatformError::Server("Error 403: Forbidden".to_string()).is_account_rejection());
        assert!(PlatformError::Server("The access token was revoked".to_string())
            .is_account_rejection());
        assert!(PlatformError::NotFound("account".to_string()).is_account_rejection());
        assert!(!PlatformError::Server("502 Bad Gateway".to_string()).is_account_rejection());
        assert!(!PlatformError::Network("connection reset by peer".to_string())
            .is_account_rejection());
    }

    #[test]
    fn test_error_message_formatting_platform() {
        let error = MoaError::Platform(PlatformError::Duplicate("Status is a duplicate".to_string()));
        assert_eq!(
            error.to_string(),
            "Platform error: Duplicate content: Status is a duplicate"
        );
    }

    #[test]
    fn test_error_message_formatting_config_invalid_value() {
        let error = MoaError::Config(ConfigError::InvalidValue {
            field: "retry.attempts".to_string(),
            reason: "must be at least 1".to_string(),
        });
        assert_eq!(
            error.to_string(),
            "Configuration error: Invalid value for retry.attempts: must be at least 1"
        );
    }

    #[test]
    fn test_platform_accessor() {
        let error: MoaError = PlatformError::RateLimit("wait".to_string()).into();
        assert_eq!(
            error.platform(),
            Some(&PlatformError::RateLimit("wait".to_string()))
        );

        let error = MoaError::InvalidInput("bad".to_string());
        assert!(error.platform().is_none());
    }

    #[test]
    fn test_error_conversion_from_media_error() {
        let media_error = MediaError::Rejected("empty file".to_string());
        let moa_error: MoaError = media_error.into();

        match moa_error {
            MoaError::Media(MediaError::Rejected(_)) => {}
            _ => panic!("Expected MoaError::Media"),
        }
    }

    #[test]
    fn test_error_conversion_from_db_error() {
        let db_error = DbError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "test",
        ));
        let moa_error: MoaError = db_error.into();

        match moa_error {
            MoaError::Database(_) => {}
            _ => panic!("Expected MoaError::Database"),
        }
    }
}
