//! Mastodon statuses headed for Twitter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::message::text;
use crate::message::{MessageContext, SkipReason};
use crate::settings::{Settings, TOOT_UNLESS_TAG};
use crate::splitter::{OverflowPolicy, Splitter};
use crate::types::{MediaAttachment, MediaKind, Visibility};

/// A status as returned by a Mastodon timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TootData {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub in_reply_to_account_id: Option<String>,
    pub account: TootAccount,
    #[serde(default)]
    pub reblog: Option<Box<TootData>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub spoiler_text: String,
    #[serde(default)]
    pub media_attachments: Vec<TootMedia>,
    #[serde(default)]
    pub mentions: Vec<TootMention>,
    #[serde(default)]
    pub tags: Vec<TootTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TootAccount {
    pub id: String,
    pub username: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TootMedia {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TootMention {
    pub username: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TootTag {
    pub name: String,
}

/// `@user@host` for an account profile URL
fn qualified_handle(username: &str, profile_url: &str) -> String {
    match url::Url::parse(profile_url).ok().and_then(|u| u.host_str().map(str::to_string)) {
        Some(host) => format!("@{}@{}", username, host),
        None => format!("@{}", username),
    }
}

fn instance_url(status_url: &str) -> String {
    match url::Url::parse(status_url) {
        Ok(u) => match u.host_str() {
            Some(host) => format!("{}://{}", u.scheme(), host),
            None => String::new(),
        },
        Err(_) => String::new(),
    }
}

#[derive(Debug, Clone)]
pub struct Toot {
    data: TootData,
    settings: Settings,
    too_old: bool,
    leading_mention: bool,
    splitter: Splitter,
    attachments: Vec<MediaAttachment>,
    content: String,
}

impl Toot {
    pub fn new(data: TootData, settings: Settings, ctx: &MessageContext) -> Self {
        let too_old = ctx.is_too_old(data.created_at);
        let leading_mention = text::strip_markup(&source(&data).content)
            .trim_start()
            .starts_with('@');
        let attachments = source(&data)
            .media_attachments
            .iter()
            .map(|m| MediaAttachment {
                url: m.url.clone(),
                description: m.description.clone().filter(|d| !d.is_empty()),
                kind: match m.kind.as_str() {
                    "video" => MediaKind::Video,
                    "gifv" => MediaKind::AnimatedGif,
                    _ => MediaKind::Image,
                },
                variants: Vec::new(),
            })
            .collect();

        let mut toot = Self {
            data,
            settings,
            too_old,
            leading_mention,
            splitter: Splitter::new(ctx.twitter_url_length),
            attachments,
            content: String::new(),
        };
        toot.content = toot.normalize(ctx);
        toot
    }

    pub fn data(&self) -> &TootData {
        &self.data
    }

    pub fn id(&self) -> &str {
        &self.data.id
    }

    pub fn url(&self) -> &str {
        source(&self.data).url.as_deref().unwrap_or_default()
    }

    pub fn is_boost(&self) -> bool {
        self.data.reblog.is_some()
    }

    pub fn is_reply(&self) -> bool {
        self.leading_mention || self.data.in_reply_to_id.is_some()
    }

    pub fn is_self_reply(&self) -> bool {
        self.is_reply()
            && self.data.in_reply_to_account_id.as_deref() == Some(self.data.account.id.as_str())
    }

    pub fn in_reply_to_id(&self) -> Option<&str> {
        self.data.in_reply_to_id.as_deref()
    }

    pub fn is_sensitive(&self) -> bool {
        source(&self.data).sensitive
    }

    pub fn media_attachments(&self) -> &[MediaAttachment] {
        &self.attachments
    }

    /// Sensitive media is replaced by a link back to the status
    pub fn media_behind_link(&self) -> bool {
        self.is_sensitive() && self.settings.post_sensitive_behind_link
    }

    pub fn clean_content(&self) -> &str {
        &self.content
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        if self.too_old {
            return Some(SkipReason::TooOld);
        }

        match self.data.visibility {
            Visibility::Direct => return Some(SkipReason::DirectMessage),
            Visibility::Private if !self.settings.post_private_to_twitter => {
                return Some(SkipReason::Private)
            }
            Visibility::Unlisted if !self.settings.post_unlisted_to_twitter => {
                return Some(SkipReason::Unlisted)
            }
            _ => {}
        }

        if self.is_reply() && !self.is_self_reply() {
            return Some(SkipReason::Reply);
        }

        if self.is_boost() {
            return if self.settings.post_boosts_to_twitter {
                None
            } else {
                Some(SkipReason::BoostsDisabled)
            };
        }

        let tags = self.data.tags.iter().map(|t| t.name.as_str());
        match self.settings.conditional_posting.allows(tags, TOOT_UNLESS_TAG) {
            Some(true) => None,
            Some(false) => Some(SkipReason::ConditionalTags),
            None => {
                if self.data.visibility == Visibility::Public && !self.settings.post_to_twitter {
                    Some(SkipReason::PostingDisabled)
                } else {
                    None
                }
            }
        }
    }

    pub fn prepare_for_post(&self, max_length: usize) -> Vec<String> {
        let policy = if self.settings.split_twitter_messages {
            OverflowPolicy::Split
        } else {
            OverflowPolicy::Truncate
        };

        self.splitter.fit(&self.content, self.url(), max_length, policy)
    }

    fn normalize(&self, ctx: &MessageContext) -> String {
        let status = source(&self.data);

        let content = text::strip_markup(&status.content);
        let content = text::unescape(&content);

        let mentions: HashMap<String, String> = self
            .data
            .mentions
            .iter()
            .chain(status.mentions.iter())
            .map(|m| (m.username.clone(), qualified_handle(&m.username, &m.url)))
            .collect();
        let content = text::qualify_mentions(&content, &mentions);
        let content = text::rewrite_twitter_handles(&content, ctx.sanitize_twitter_handles);

        let content = text::strip_media_urls(&content, &instance_url(self.url()));
        let mut content = content.trim().to_string();

        if !status.spoiler_text.is_empty() {
            content = format!("CW: {}\n\n{}", status.spoiler_text, content);
        }

        if let Some(reblog) = &self.data.reblog {
            let author = qualified_handle(&reblog.account.username, &reblog.account.url);
            content = if content.is_empty() {
                format!("RT {}\n{}\n", author, self.url())
            } else {
                format!("RT {}\n{}\n{}", author, content, self.url())
            };
        }

        if self.media_behind_link() && !self.attachments.is_empty() {
            content = format!(
                "{}\n{}\n{}",
                content,
                self.settings.sensitive_link_text,
                self.url()
            );
        }

        debug!(toot_id = %self.data.id, "normalized toot");
        content
    }
}

/// The status whose content is shown: the boosted one for boosts
fn source(data: &TootData) -> &TootData {
    data.reblog.as_deref().unwrap_or(data)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::settings::ConditionalPosting;
    use chrono::{Duration, TimeZone};

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    pub(crate) fn ctx() -> MessageContext {
        MessageContext {
            now: now(),
            hour_cutoff: 8,
            sanitize_twitter_handles: true,
            twitter_mention_suffix: "@twitter.com".to_string(),
            twitter_url_length: 23,
            toot_length: 500,
        }
    }

    pub(crate) fn toot_data(id: &str, content: &str) -> TootData {
        TootData {
            id: id.to_string(),
            created_at: now() - Duration::minutes(5),
            url: Some(format!("https://pdx.social/@moa/{}", id)),
            visibility: Visibility::Public,
            in_reply_to_id: None,
            in_reply_to_account_id: None,
            account: TootAccount {
                id: "1".to_string(),
                username: "moa".to_string(),
                url: "https://pdx.social/@moa".to_string(),
            },
            reblog: None,
            content: content.to_string(),
            sensitive: false,
            spoiler_text: String::new(),
            media_attachments: Vec::new(),
            mentions: Vec::new(),
            tags: Vec::new(),
        }
    }

    fn boost_of(inner: TootData) -> TootData {
        let mut outer = toot_data("200", "");
        outer.reblog = Some(Box::new(inner));
        outer
    }

    fn other_author(mut data: TootData) -> TootData {
        data.account = TootAccount {
            id: "2".to_string(),
            username: "friend".to_string(),
            url: "https://mastodon.social/@friend".to_string(),
        };
        data.url = Some(format!("https://mastodon.social/@friend/{}", data.id));
        data
    }

    #[test]
    fn test_plain_toot_normalization() {
        let toot = Toot::new(
            toot_data("1", "<p>Hello &amp; welcome</p><p>second</p>"),
            Settings::default(),
            &ctx(),
        );

        assert_eq!(toot.clean_content(), "Hello & welcome\n\nsecond");
        assert_eq!(toot.skip_reason(), None);
    }

    #[test]
    fn test_mentions_are_qualified() {
        let mut data = toot_data(
            "1",
            "<p><span class=\"h-card\"><a href=\"https://mastodon.social/@friend\" class=\"u-url mention\">@<span>friend</span></a></span> hi</p>",
        );
        data.mentions = vec![TootMention {
            username: "friend".to_string(),
            url: "https://mastodon.social/@friend".to_string(),
        }];

        let toot = Toot::new(data, Settings::default(), &ctx());
        assert_eq!(toot.clean_content(), "@friend@mastodon.social hi");
    }

    #[test]
    fn test_spoiler_becomes_prefix() {
        let mut data = toot_data("1", "<p>the ending</p>");
        data.spoiler_text = "movie spoilers".to_string();

        let toot = Toot::new(data, Settings::default(), &ctx());
        assert_eq!(toot.clean_content(), "CW: movie spoilers\n\nthe ending");
    }

    #[test]
    fn test_media_links_removed() {
        let mut data = toot_data("1", "<p>pic https://pdx.social/media/xyz_1 </p>");
        data.media_attachments = vec![TootMedia {
            kind: "image".to_string(),
            url: "https://files.pdx.social/a.png".to_string(),
            description: Some("a cat".to_string()),
        }];

        let toot = Toot::new(data, Settings::default(), &ctx());
        assert_eq!(toot.clean_content(), "pic");
        assert_eq!(toot.media_attachments().len(), 1);
        assert_eq!(
            toot.media_attachments()[0].description.as_deref(),
            Some("a cat")
        );
    }

    #[test]
    fn test_empty_boost_is_prefix_and_url() {
        let inner = other_author(toot_data("100", ""));
        let toot = Toot::new(boost_of(inner), Settings::default(), &ctx());

        assert_eq!(
            toot.clean_content(),
            "RT @friend@mastodon.social\nhttps://mastodon.social/@friend/100\n"
        );
        assert!(toot.is_boost());
    }

    #[test]
    fn test_boost_with_content() {
        let inner = other_author(toot_data("100", "<p>original words</p>"));
        let toot = Toot::new(boost_of(inner), Settings::default(), &ctx());

        assert_eq!(
            toot.clean_content(),
            "RT @friend@mastodon.social\noriginal words\nhttps://mastodon.social/@friend/100"
        );
    }

    #[test]
    fn test_sensitive_media_goes_behind_link() {
        let mut data = toot_data("1", "<p>spicy</p>");
        data.sensitive = true;
        data.media_attachments = vec![TootMedia {
            kind: "image".to_string(),
            url: "https://files.pdx.social/a.png".to_string(),
            description: None,
        }];
        let settings = Settings {
            post_sensitive_behind_link: true,
            sensitive_link_text: "(NSFW)".to_string(),
            ..Settings::default()
        };

        let toot = Toot::new(data, settings, &ctx());
        assert!(toot.media_behind_link());
        assert_eq!(
            toot.clean_content(),
            "spicy\n(NSFW)\nhttps://pdx.social/@moa/1"
        );
    }

    #[test]
    fn test_too_old_skips_regardless_of_settings() {
        let mut data = toot_data("1", "<p>old</p>");
        data.created_at = now() - Duration::hours(9);
        let settings = Settings {
            conditional_posting: ConditionalPosting::Disabled,
            post_to_twitter: true,
            ..Settings::default()
        };

        let toot = Toot::new(data, settings, &ctx());
        assert_eq!(toot.skip_reason(), Some(SkipReason::TooOld));
    }

    #[test]
    fn test_visibility_gates() {
        let mut data = toot_data("1", "<p>dm</p>");
        data.visibility = Visibility::Direct;
        assert_eq!(
            Toot::new(data, Settings::default(), &ctx()).skip_reason(),
            Some(SkipReason::DirectMessage)
        );

        let mut data = toot_data("1", "<p>private</p>");
        data.visibility = Visibility::Private;
        assert_eq!(
            Toot::new(data.clone(), Settings::default(), &ctx()).skip_reason(),
            Some(SkipReason::Private)
        );
        let settings = Settings {
            post_private_to_twitter: true,
            ..Settings::default()
        };
        assert_eq!(Toot::new(data, settings, &ctx()).skip_reason(), None);

        let mut data = toot_data("1", "<p>public</p>");
        data.visibility = Visibility::Public;
        let settings = Settings {
            post_to_twitter: false,
            ..Settings::default()
        };
        assert_eq!(
            Toot::new(data, settings, &ctx()).skip_reason(),
            Some(SkipReason::PostingDisabled)
        );
    }

    #[test]
    fn test_replies() {
        let mut data = toot_data("5", "<p>continuing</p>");
        data.in_reply_to_id = Some("4".to_string());
        data.in_reply_to_account_id = Some("1".to_string());
        let toot = Toot::new(data.clone(), Settings::default(), &ctx());
        assert!(toot.is_self_reply());
        assert_eq!(toot.skip_reason(), None);

        data.in_reply_to_account_id = Some("2".to_string());
        let toot = Toot::new(data, Settings::default(), &ctx());
        assert!(!toot.is_self_reply());
        assert_eq!(toot.skip_reason(), Some(SkipReason::Reply));

        // leading mention counts as a reply
        let toot = Toot::new(toot_data("6", "<p>@someone hey</p>"), Settings::default(), &ctx());
        assert_eq!(toot.skip_reason(), Some(SkipReason::Reply));
    }

    #[test]
    fn test_boost_gate_bypasses_public_flag() {
        let inner = other_author(toot_data("100", "<p>x</p>"));
        let settings = Settings {
            post_to_twitter: false,
            post_boosts_to_twitter: true,
            ..Settings::default()
        };
        assert_eq!(
            Toot::new(boost_of(inner.clone()), settings, &ctx()).skip_reason(),
            None
        );

        let settings = Settings {
            post_boosts_to_twitter: false,
            ..Settings::default()
        };
        assert_eq!(
            Toot::new(boost_of(inner), settings, &ctx()).skip_reason(),
            Some(SkipReason::BoostsDisabled)
        );
    }

    #[test]
    fn test_conditional_posting() {
        let mut data = toot_data("1", "<p>tagged</p>");
        data.tags = vec![TootTag { name: "nt".to_string() }];

        let unless = Settings {
            conditional_posting: ConditionalPosting::Unless,
            ..Settings::default()
        };
        assert_eq!(
            Toot::new(data.clone(), unless, &ctx()).skip_reason(),
            Some(SkipReason::ConditionalTags)
        );

        let only_if = Settings {
            conditional_posting: ConditionalPosting::OnlyIf,
            post_to_twitter: false,
            ..Settings::default()
        };
        data.tags = vec![TootTag { name: "xp".to_string() }];
        assert_eq!(Toot::new(data, only_if, &ctx()).skip_reason(), None);
    }

    #[test]
    fn test_prepare_for_post_truncates_when_split_disabled() {
        let body = format!("<p>{}</p>", "word ".repeat(100));
        let settings = Settings {
            split_twitter_messages: false,
            ..Settings::default()
        };

        let toot = Toot::new(toot_data("1", &body), settings, &ctx());
        let parts = toot.prepare_for_post(280);

        assert_eq!(parts.len(), 1);
        assert!(parts[0].ends_with("…\nhttps://pdx.social/@moa/1"));
    }

    #[test]
    fn test_deserializes_mastodon_json() {
        let json = r#"{
            "id": "109",
            "created_at": "2024-05-01T11:58:00.000Z",
            "url": "https://pdx.social/@moa/109",
            "visibility": "unlisted",
            "in_reply_to_id": null,
            "in_reply_to_account_id": null,
            "account": {"id": "1", "username": "moa", "url": "https://pdx.social/@moa"},
            "reblog": null,
            "content": "<p>hi</p>",
            "sensitive": false,
            "spoiler_text": "",
            "media_attachments": [{"id": "9", "type": "gifv", "url": "https://files/x.mp4", "description": null}],
            "mentions": [],
            "tags": [{"name": "moa", "url": "https://pdx.social/tags/moa"}]
        }"#;

        let data: TootData = serde_json::from_str(json).unwrap();
        let toot = Toot::new(data, Settings::default(), &ctx());

        assert_eq!(toot.id(), "109");
        assert_eq!(toot.media_attachments()[0].kind, MediaKind::AnimatedGif);
        assert_eq!(toot.skip_reason(), Some(SkipReason::Unlisted));
    }
}
