//! Per-bridge behavior flags
//!
//! Settings are read-only for the duration of a run. They are persisted as a
//! JSON document so that flags added later decode with their defaults.

use serde::{Deserialize, Serialize};

use crate::types::Visibility;

/// Tags that must be present when posting is conditional on opt-in
pub const ONLY_IF_TAGS: &[&str] = &["moa", "xp"];

/// Tags that suppress cross-posting when posting is conditional on opt-out
pub const UNLESS_TAGS: &[&str] = &["nomoa", "noxp"];

/// Extra opt-out tag for toots ("no twitter")
pub const TOOT_UNLESS_TAG: &str = "nt";

/// Extra opt-out tag for tweets ("no mastodon")
pub const TWEET_UNLESS_TAG: &str = "nm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalPosting {
    /// Post according to the visibility flags only
    #[default]
    Disabled,
    /// Post only items carrying one of [`ONLY_IF_TAGS`]
    OnlyIf,
    /// Post everything except items carrying an opt-out tag
    Unless,
}

impl ConditionalPosting {
    /// Decide whether a tag set passes the rule
    ///
    /// Returns `None` when the rule is disabled and the caller should fall
    /// back to its own visibility gate.
    pub fn allows<'a, I>(&self, tags: I, extra_unless_tag: &str) -> Option<bool>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let tags: Vec<String> = tags.into_iter().map(|t| t.to_lowercase()).collect();
        let has = |wanted: &str| tags.iter().any(|t| t == wanted);

        match self {
            ConditionalPosting::Disabled => None,
            ConditionalPosting::OnlyIf => Some(ONLY_IF_TAGS.iter().any(|t| has(t))),
            ConditionalPosting::Unless => {
                let blocked = UNLESS_TAGS.iter().any(|t| has(t)) || has(extra_unless_tag);
                Some(!blocked)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Mastodon -> Twitter
    /// Post public toots
    pub post_to_twitter: bool,
    pub post_private_to_twitter: bool,
    pub post_unlisted_to_twitter: bool,
    pub post_boosts_to_twitter: bool,
    pub split_twitter_messages: bool,
    pub post_sensitive_behind_link: bool,
    pub sensitive_link_text: String,
    pub conditional_posting: ConditionalPosting,

    // Twitter -> Mastodon
    /// Post plain tweets
    pub post_to_mastodon: bool,
    pub post_rts_to_mastodon: bool,
    pub post_quotes_to_mastodon: bool,
    pub toot_visibility: Visibility,
    pub tweets_behind_cw: bool,
    pub tweet_cw_text: String,

    // Instagram
    pub instagram_post_to_twitter: bool,
    pub instagram_post_to_mastodon: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            post_to_twitter: true,
            post_private_to_twitter: false,
            post_unlisted_to_twitter: false,
            post_boosts_to_twitter: true,
            split_twitter_messages: true,
            post_sensitive_behind_link: false,
            sensitive_link_text: "(NSFW media)".to_string(),
            conditional_posting: ConditionalPosting::Disabled,

            post_to_mastodon: true,
            post_rts_to_mastodon: true,
            post_quotes_to_mastodon: true,
            toot_visibility: Visibility::Public,
            tweets_behind_cw: false,
            tweet_cw_text: "From birdsite".to_string(),

            instagram_post_to_twitter: false,
            instagram_post_to_mastodon: false,
        }
    }
}

impl Settings {
    /// Whether any toot is ever posted to Twitter
    pub fn post_to_twitter_enabled(&self) -> bool {
        self.post_to_twitter
            || self.post_private_to_twitter
            || self.post_unlisted_to_twitter
            || self.post_boosts_to_twitter
    }

    /// Whether any tweet is ever posted to Mastodon
    pub fn post_to_mastodon_enabled(&self) -> bool {
        self.post_to_mastodon || self.post_rts_to_mastodon
    }

    pub fn post_instagram_enabled(&self) -> bool {
        self.instagram_post_to_twitter || self.instagram_post_to_mastodon
    }
}
