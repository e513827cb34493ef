//! A user's linkage between network accounts

use chrono::{DateTime, Utc};

use crate::settings::Settings;
use crate::types::Network;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MastodonAccount {
    pub access_code: String,
    pub account_id: String,
    pub user: String,
    pub host_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwitterAccount {
    pub oauth_token: String,
    pub oauth_secret: String,
    pub handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstagramAccount {
    pub access_code: String,
    pub account_id: String,
    pub handle: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bridge {
    pub id: i64,
    pub worker_id: i64,
    pub enabled: bool,
    pub settings_id: i64,
    pub settings: Settings,

    pub mastodon: Option<MastodonAccount>,
    pub twitter: Option<TwitterAccount>,
    pub instagram: Option<InstagramAccount>,

    pub mastodon_last_id: i64,
    pub twitter_last_id: i64,
    pub instagram_last_id: i64,

    pub updated_at: Option<DateTime<Utc>>,
}

impl Bridge {
    /// A bridge that has not been stored yet
    pub fn new(worker_id: i64, settings: Settings) -> Self {
        Self {
            id: 0,
            worker_id,
            enabled: true,
            settings_id: 0,
            settings,
            mastodon: None,
            twitter: None,
            instagram: None,
            mastodon_last_id: 0,
            twitter_last_id: 0,
            instagram_last_id: 0,
            updated_at: None,
        }
    }

    pub fn watermark(&self, network: Network) -> i64 {
        match network {
            Network::Mastodon => self.mastodon_last_id,
            Network::Twitter => self.twitter_last_id,
            Network::Instagram => self.instagram_last_id,
        }
    }

    /// Move the watermark forward; it never moves back
    ///
    /// Returns true if the watermark changed.
    pub fn advance_watermark(&mut self, network: Network, id: i64) -> bool {
        let slot = match network {
            Network::Mastodon => &mut self.mastodon_last_id,
            Network::Twitter => &mut self.twitter_last_id,
            Network::Instagram => &mut self.instagram_last_id,
        };

        if id > *slot {
            *slot = id;
            true
        } else {
            false
        }
    }

    /// Parse a network id and advance the watermark to it
    ///
    /// Ids that are not integers leave the watermark untouched.
    pub fn advance_watermark_str(&mut self, network: Network, id: &str) -> bool {
        match id.parse::<i64>() {
            Ok(id) => self.advance_watermark(network, id),
            Err(_) => false,
        }
    }

    pub fn is_connected(&self, network: Network) -> bool {
        match network {
            Network::Mastodon => self.mastodon.is_some(),
            Network::Twitter => self.twitter.is_some(),
            Network::Instagram => self.instagram.is_some(),
        }
    }

    pub fn clear_credentials(&mut self, network: Network) {
        match network {
            Network::Mastodon => self.mastodon = None,
            Network::Twitter => self.twitter = None,
            Network::Instagram => self.instagram = None,
        }
    }

    /// Drop the credential that failed and stop syncing the bridge
    pub fn disable(&mut self, network: Network) {
        self.clear_credentials(network);
        self.enabled = false;
    }

    pub fn mastodon_host_id(&self) -> Option<i64> {
        self.mastodon.as_ref().map(|m| m.host_id)
    }

    /// Human readable label for log lines
    pub fn label(&self) -> String {
        match (&self.mastodon, &self.twitter) {
            (Some(m), Some(t)) => format!("{} / @{}", m.user, t.handle),
            (Some(m), None) => m.user.clone(),
            (None, Some(t)) => format!("@{}", t.handle),
            (None, None) => format!("bridge {}", self.id),
        }
    }
}
