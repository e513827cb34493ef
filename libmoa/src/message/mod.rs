//! Message model
//!
//! A [`Message`] wraps one fetched foreign item together with the settings
//! of the bridge it belongs to. Content is normalized once, when the message
//! is constructed, so every accessor is a cheap read of immutable state.

pub mod insta;
pub mod text;
pub mod toot;
pub mod tweet;

pub use insta::{Insta, InstaData};
pub use toot::{Toot, TootData};
pub use tweet::{Tweet, TweetData, TweetMedia};

use chrono::{DateTime, Duration, Utc};
use std::fmt;

use crate::config::Config;
use crate::types::{MediaAttachment, Network};

/// Run-wide inputs to normalization and skip decisions
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub now: DateTime<Utc>,
    pub hour_cutoff: i64,
    pub sanitize_twitter_handles: bool,
    pub twitter_mention_suffix: String,
    pub twitter_url_length: usize,
    pub toot_length: usize,
}

impl MessageContext {
    pub fn from_config(config: &Config, now: DateTime<Utc>) -> Self {
        Self {
            now,
            hour_cutoff: config.sync.hour_cutoff,
            sanitize_twitter_handles: config.sync.sanitize_twitter_handles,
            twitter_mention_suffix: config.sync.twitter_mention_suffix.clone(),
            twitter_url_length: config.limits.twitter_url_length,
            toot_length: config.limits.toot_length,
        }
    }

    pub fn is_too_old(&self, created_at: DateTime<Utc>) -> bool {
        self.now - created_at >= Duration::hours(self.hour_cutoff)
    }
}

/// Why an item is not cross-posted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooOld,
    DirectMessage,
    Private,
    Unlisted,
    Reply,
    Quote,
    BoostsDisabled,
    ConditionalTags,
    PostingDisabled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::TooOld => "older than the age cutoff",
            SkipReason::DirectMessage => "direct message",
            SkipReason::Private => "private posts are not cross-posted",
            SkipReason::Unlisted => "unlisted posts are not cross-posted",
            SkipReason::Reply => "reply to someone else",
            SkipReason::Quote => "quotes are not cross-posted",
            SkipReason::BoostsDisabled => "boosts are not cross-posted",
            SkipReason::ConditionalTags => "conditional posting tags",
            SkipReason::PostingDisabled => "posting disabled",
        };
        write!(f, "{}", reason)
    }
}

/// A raw item returned by a network port
#[derive(Debug, Clone)]
pub enum Item {
    Toot(TootData),
    Tweet(TweetData),
    Insta(InstaData),
}

impl Item {
    /// Numeric position used for watermark comparison
    pub fn sequence_id(&self) -> Option<i64> {
        match self {
            Item::Toot(data) => data.id.parse().ok(),
            Item::Tweet(data) => i64::try_from(data.id).ok(),
            Item::Insta(data) => Some(data.created_time),
        }
    }

    pub fn network(&self) -> Network {
        match self {
            Item::Toot(_) => Network::Mastodon,
            Item::Tweet(_) => Network::Twitter,
            Item::Insta(_) => Network::Instagram,
        }
    }
}

/// A fetched item ready for posting
#[derive(Debug, Clone)]
pub enum Message {
    Toot(Toot),
    Tweet(Tweet),
    Insta(Insta),
}

impl Message {
    /// Network the item was fetched from
    pub fn network(&self) -> Network {
        match self {
            Message::Toot(_) => Network::Mastodon,
            Message::Tweet(_) => Network::Twitter,
            Message::Insta(_) => Network::Instagram,
        }
    }

    pub fn id(&self) -> String {
        match self {
            Message::Toot(m) => m.id().to_string(),
            Message::Tweet(m) => m.id().to_string(),
            Message::Insta(m) => m.id().to_string(),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Message::Toot(m) => m.url(),
            Message::Tweet(m) => m.url(),
            Message::Insta(m) => m.url(),
        }
    }

    pub fn media_attachments(&self) -> &[MediaAttachment] {
        match self {
            Message::Toot(m) => m.media_attachments(),
            Message::Tweet(m) => m.media_attachments(),
            Message::Insta(m) => m.media_attachments(),
        }
    }

    /// Boost on Mastodon, retweet on Twitter
    pub fn is_boost(&self) -> bool {
        match self {
            Message::Toot(m) => m.is_boost(),
            Message::Tweet(m) => m.is_retweet(),
            Message::Insta(_) => false,
        }
    }

    pub fn in_reply_to_id(&self) -> Option<String> {
        match self {
            Message::Toot(m) => m.in_reply_to_id().map(str::to_string),
            Message::Tweet(m) => m.in_reply_to_id().map(|id| id.to_string()),
            Message::Insta(_) => None,
        }
    }

    pub fn is_self_reply(&self) -> bool {
        match self {
            Message::Toot(m) => m.is_self_reply(),
            Message::Tweet(m) => m.is_self_reply(),
            Message::Insta(_) => false,
        }
    }

    pub fn is_sensitive(&self) -> bool {
        match self {
            Message::Toot(m) => m.is_sensitive(),
            Message::Tweet(m) => m.is_sensitive(),
            Message::Insta(_) => false,
        }
    }

    /// Content warning carried separately from the body
    pub fn content_warning(&self) -> Option<&str> {
        match self {
            Message::Tweet(m) => m.content_warning(),
            Message::Toot(_) | Message::Insta(_) => None,
        }
    }

    /// Whether media is replaced by a link instead of being transferred
    pub fn media_behind_link(&self) -> bool {
        match self {
            Message::Toot(m) => m.media_behind_link(),
            Message::Tweet(_) | Message::Insta(_) => false,
        }
    }

    /// First matching skip rule for posting to `destination`
    pub fn skip_reason(&self, destination: Network) -> Option<SkipReason> {
        match self {
            Message::Toot(m) => m.skip_reason(),
            Message::Tweet(m) => m.skip_reason(),
            Message::Insta(m) => m.skip_reason(destination),
        }
    }

    pub fn should_skip(&self, destination: Network) -> bool {
        self.skip_reason(destination).is_some()
    }

    pub fn clean_content(&self) -> &str {
        match self {
            Message::Toot(m) => m.clean_content(),
            Message::Tweet(m) => m.clean_content(),
            Message::Insta(m) => m.clean_content(),
        }
    }

    /// Ordered post bodies fitting `max_length`
    pub fn prepare_for_post(&self, max_length: usize) -> Vec<String> {
        match self {
            Message::Toot(m) => m.prepare_for_post(max_length),
            Message::Tweet(m) => m.prepare_for_post(max_length),
            Message::Insta(m) => m.prepare_for_post(max_length),
        }
    }
}

impl From<Toot> for Message {
    fn from(toot: Toot) -> Self {
        Message::Toot(toot)
    }
}

impl From<Tweet> for Message {
    fn from(tweet: Tweet) -> Self {
        Message::Tweet(tweet)
    }
}

impl From<Insta> for Message {
    fn from(insta: Insta) -> Self {
        Message::Insta(insta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use chrono::TimeZone;

    #[test]
    fn test_age_cutoff_is_inclusive() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let ctx = MessageContext::from_config(&Config::default_config(), now);

        assert!(ctx.is_too_old(now - Duration::hours(8)));
        assert!(!ctx.is_too_old(now - Duration::hours(8) + Duration::seconds(1)));
    }

    #[test]
    fn test_item_sequence_ids() {
        let toot = toot::tests::toot_data("110", "");
        assert_eq!(Item::Toot(toot).sequence_id(), Some(110));

        let bad = toot::tests::toot_data("not-a-number", "");
        assert_eq!(Item::Toot(bad).sequence_id(), None);
    }

    #[test]
    fn test_dispatch_through_message() {
        let ctx = toot::tests::ctx();
        let toot = Toot::new(
            toot::tests::toot_data("7", "<p>hello</p>"),
            Settings::default(),
            &ctx,
        );
        let message = Message::from(toot);

        assert_eq!(message.network(), Network::Mastodon);
        assert_eq!(message.id(), "7");
        assert_eq!(message.url(), "https://pdx.social/@moa/7");
        assert_eq!(message.clean_content(), "hello");
        assert!(!message.should_skip(Network::Twitter));
        assert_eq!(message.prepare_for_post(280), vec!["hello".to_string()]);
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(SkipReason::TooOld.to_string(), "older than the age cutoff");
    }
}
