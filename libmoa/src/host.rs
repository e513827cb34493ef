//! Remote Mastodon hosts and their circuit breaker
//!
//! When fetching from a host keeps failing, the host is deferred for a fixed
//! window. Each consecutive deferral adds a strike; once the strike count
//! reaches the threshold the caller disables every bridge on the host. Any
//! successful fetch clears the strikes.

use chrono::{DateTime, Duration, Utc};

use crate::config::DeferConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MastodonHost {
    pub id: i64,
    pub hostname: String,
    pub client_id: String,
    pub client_secret: String,
    pub defer_until: Option<DateTime<Utc>>,
    pub defer_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferPolicy {
    pub window: Duration,
    pub strike_threshold: u32,
}

impl DeferPolicy {
    pub fn from_config(config: &DeferConfig) -> Self {
        Self {
            window: Duration::minutes(config.window_minutes),
            strike_threshold: config.strike_threshold,
        }
    }
}

impl Default for DeferPolicy {
    fn default() -> Self {
        Self::from_config(&DeferConfig::default())
    }
}

/// Result of a deferral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferOutcome {
    /// The host is backed off for one window
    Deferred,
    /// Too many strikes; bridges on the host should be disabled
    Failed,
}

impl MastodonHost {
    pub fn new(hostname: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            id: 0,
            hostname: hostname.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            defer_until: None,
            defer_count: 0,
        }
    }

    /// Whether fetches to this host must be skipped at `now`
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        matches!(self.defer_until, Some(until) if until > now)
    }

    /// Record a transient failure
    pub fn defer(&mut self, now: DateTime<Utc>, policy: &DeferPolicy) -> DeferOutcome {
        self.defer_until = Some(now + policy.window);
        self.defer_count = self.defer_count.saturating_add(1);

        if self.defer_count >= policy.strike_threshold {
            // bridges are about to be disabled; start over if they are re-enabled
            self.defer_count = 0;
            DeferOutcome::Failed
        } else {
            DeferOutcome::Deferred
        }
    }

    /// Record a successful fetch
    pub fn defer_reset(&mut self) {
        self.defer_count = 0;
        self.defer_until = None;
    }
}
