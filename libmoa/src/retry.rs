//! Send-with-retry
//!
//! Posting retries a bounded number of times with a fixed delay between
//! attempts. Errors are classified into what the caller should do next:
//! retry, treat as already posted, give up on the item, or give up on the
//! whole bridge.

use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::error::{MediaError, MoaError, PlatformError};

/// Source of the delay between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays instead of waiting
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.attempts.max(1),
            delay: Duration::from_secs(config.delay_secs),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// What to do after a failed send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retry,
    /// The destination already holds this content
    Duplicate,
    SkipItem,
    DisableBridge,
}

pub fn classify(error: &MoaError) -> Disposition {
    match error {
        MoaError::Platform(PlatformError::Duplicate(_)) => Disposition::Duplicate,
        MoaError::Platform(e) if e.is_permanent_for_bridge() => Disposition::DisableBridge,
        MoaError::Platform(e) if e.is_transient() => Disposition::Retry,
        MoaError::Media(MediaError::Transient(_)) => Disposition::Retry,
        _ => Disposition::SkipItem,
    }
}

#[derive(Debug)]
pub enum SendOutcome {
    Posted(String),
    Duplicate,
    Skipped(MoaError),
    DisableBridge(MoaError),
    Exhausted(MoaError),
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
pub async fn send_with_retry<F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    label: &str,
    mut op: F,
) -> SendOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::error::Result<String>>,
{
    let mut attempt = 1;

    loop {
        let error = match op().await {
            Ok(id) => {
                if attempt > 1 {
                    info!("Posted to {} on attempt {}", label, attempt);
                }
                return SendOutcome::Posted(id);
            }
            Err(e) => e,
        };

        match classify(&error) {
            Disposition::Duplicate => {
                info!("{} already holds this content: {}", label, error);
                return SendOutcome::Duplicate;
            }
            Disposition::DisableBridge => return SendOutcome::DisableBridge(error),
            Disposition::SkipItem => {
                warn!("Skipping item rejected by {}: {}", label, error);
                return SendOutcome::Skipped(error);
            }
            Disposition::Retry if attempt < policy.max_attempts => {
                warn!(
                    "Transient error posting to {} (attempt {}/{}): {}. Retrying in {}s...",
                    label,
                    attempt,
                    policy.max_attempts,
                    error,
                    policy.delay.as_secs()
                );
                sleeper.sleep(policy.delay).await;
                attempt += 1;
            }
            Disposition::Retry => {
                warn!(
                    "Failed to post to {} after {} attempts: {}",
                    label, policy.max_attempts, error
                );
                return SendOutcome::Exhausted(error);
            }
        }
    }
}
