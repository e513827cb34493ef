//! Tweets headed for Mastodon

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::message::text::{self, utf16_len, utf16_prefix};
use crate::message::{MessageContext, SkipReason};
use crate::settings::{Settings, TWEET_UNLESS_TAG};
use crate::splitter::Splitter;
use crate::types::{MediaAttachment, MediaKind, VideoVariant};

/// Invisible separator, so media-only tweets still carry a status body
const EMPTY_BODY: &str = "\u{2063}";

fn trailing_status_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https://twitter\.com/\S*\s*\z").expect("static regex is valid")
    })
}

mod twitter_date {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    /// Accepts Twitter's `Wed Oct 10 20:19:24 +0000 2018` as well as RFC 3339
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_str(&raw, FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(&raw))
            .map(|date| date.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetData {
    pub id: u64,
    #[serde(with = "twitter_date")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub full_text: String,
    pub user: TweetUser,
    #[serde(default)]
    pub in_reply_to_status_id: Option<u64>,
    #[serde(default)]
    pub in_reply_to_user_id: Option<u64>,
    #[serde(default)]
    pub in_reply_to_screen_name: Option<String>,
    #[serde(default)]
    pub retweeted_status: Option<Box<TweetData>>,
    #[serde(default)]
    pub quoted_status: Option<Box<TweetData>>,
    #[serde(default)]
    pub urls: Vec<TweetUrl>,
    #[serde(default)]
    pub user_mentions: Vec<TweetMention>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub possibly_sensitive: bool,
    /// Usually empty in timeline views; filled from the detail lookup
    #[serde(default)]
    pub media: Vec<TweetMedia>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetUser {
    pub id: u64,
    pub screen_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetUrl {
    /// Shortened t.co link as it appears in the text
    pub url: String,
    pub expanded_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetMention {
    pub screen_name: String,
    /// Code point offsets into the unescaped-as-received text
    pub indices: [usize; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TweetMedia {
    /// t.co link to the media page
    pub url: String,
    pub media_url: String,
    #[serde(rename = "type", default)]
    pub kind: MediaKind,
    #[serde(default)]
    pub ext_alt_text: Option<String>,
    #[serde(default)]
    pub variants: Vec<VideoVariant>,
}

impl TweetData {
    pub fn is_retweet(&self) -> bool {
        self.retweeted_status.is_some()
    }

    pub fn is_quote(&self) -> bool {
        self.quoted_status.is_some()
    }

    pub fn is_self_reply(&self) -> bool {
        self.in_reply_to_status_id.is_some() && self.in_reply_to_user_id == Some(self.user.id)
    }

    /// Replies to other people, and self replies that start with a mention
    pub fn is_reply(&self) -> bool {
        self.in_reply_to_screen_name.is_some()
            && (!self.is_self_reply() || self.full_text.starts_with('@'))
    }

    /// Id of the status whose media should be attached
    pub fn media_target_id(&self) -> u64 {
        if let Some(retweeted) = &self.retweeted_status {
            retweeted.id
        } else if let Some(quoted) = &self.quoted_status {
            if self.media.is_empty() {
                quoted.id
            } else {
                self.id
            }
        } else {
            self.id
        }
    }

    pub fn url(&self) -> String {
        let (user, id) = match (&self.retweeted_status, &self.quoted_status) {
            (Some(target), _) | (None, Some(target)) => (&target.user.screen_name, target.id),
            (None, None) => (&self.user.screen_name, self.id),
        };
        format!("https://twitter.com/{}/status/{}", user, id)
    }
}

/// Skip rules for a tweet, usable before its media has been fetched
pub fn would_skip(data: &TweetData, settings: &Settings, ctx: &MessageContext) -> Option<SkipReason> {
    skip_reason_for(data, settings, ctx.is_too_old(data.created_at))
}

fn skip_reason_for(data: &TweetData, settings: &Settings, too_old: bool) -> Option<SkipReason> {
    if too_old {
        return Some(SkipReason::TooOld);
    }

    if data.is_reply() {
        return Some(SkipReason::Reply);
    }

    if data.is_quote() && !settings.post_quotes_to_mastodon {
        return Some(SkipReason::Quote);
    }

    if data.is_retweet() {
        return if settings.post_rts_to_mastodon {
            None
        } else {
            Some(SkipReason::BoostsDisabled)
        };
    }

    let tags = data.hashtags.iter().map(String::as_str);
    if settings.conditional_posting.allows(tags, TWEET_UNLESS_TAG) == Some(false) {
        return Some(SkipReason::ConditionalTags);
    }

    if !settings.post_to_mastodon {
        return Some(SkipReason::PostingDisabled);
    }

    None
}

/// Replace each mention entity with `@name{suffix}`
///
/// Entities are applied back to front so earlier offsets stay valid.
fn expand_mentions(text: &str, mentions: &[TweetMention], suffix: &str) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    let mut ordered: Vec<&TweetMention> = mentions.iter().collect();
    ordered.sort_by(|a, b| b.indices[0].cmp(&a.indices[0]));

    for mention in ordered {
        let [start, end] = mention.indices;
        if start >= end || end > chars.len() {
            continue;
        }
        let replacement = format!("@{}{}", mention.screen_name, suffix);
        chars.splice(start..end, replacement.chars());
    }

    chars.into_iter().collect()
}

fn unshorten(text: &str, urls: &[TweetUrl]) -> String {
    text::replace_all_literal(
        text,
        urls.iter().map(|u| (u.url.as_str(), u.expanded_url.as_str())),
    )
}

fn remove_media_links(text: &str, media: &[TweetMedia]) -> String {
    text::replace_all_literal(text, media.iter().map(|m| (m.url.as_str(), "")))
}

/// Mentions expanded, entities unescaped, links unshortened
fn body_text(data: &TweetData, suffix: &str) -> String {
    let text = expand_mentions(&data.full_text, &data.user_mentions, suffix);
    let text = text::unescape(&text);
    unshorten(&text, &data.urls)
}

#[derive(Debug, Clone)]
pub struct Tweet {
    data: TweetData,
    settings: Settings,
    too_old: bool,
    url: String,
    attachments: Vec<MediaAttachment>,
    splitter: Splitter,
    content: String,
    content_warning: Option<String>,
}

impl Tweet {
    /// `media` is the attachment metadata of [`TweetData::media_target_id`]
    pub fn new(
        data: TweetData,
        media: Vec<TweetMedia>,
        settings: Settings,
        ctx: &MessageContext,
    ) -> Self {
        let too_old = ctx.is_too_old(data.created_at);
        let url = data.url();
        let (content, content_warning) = normalize(&data, &media, &url, ctx);
        let attachments = media.iter().map(attachment).collect();

        debug!(tweet_id = data.id, "normalized tweet");

        Self {
            data,
            settings,
            too_old,
            url,
            attachments,
            splitter: Splitter::new(ctx.twitter_url_length),
            content,
            content_warning,
        }
    }

    pub fn data(&self) -> &TweetData {
        &self.data
    }

    pub fn id(&self) -> u64 {
        self.data.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_retweet(&self) -> bool {
        self.data.is_retweet()
    }

    pub fn is_quote(&self) -> bool {
        self.data.is_quote()
    }

    pub fn is_self_reply(&self) -> bool {
        self.data.is_self_reply()
    }

    pub fn in_reply_to_id(&self) -> Option<u64> {
        self.data.in_reply_to_status_id
    }

    pub fn is_sensitive(&self) -> bool {
        self.data.possibly_sensitive
    }

    pub fn content_warning(&self) -> Option<&str> {
        self.content_warning.as_deref()
    }

    pub fn media_attachments(&self) -> &[MediaAttachment] {
        &self.attachments
    }

    pub fn clean_content(&self) -> &str {
        &self.content
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        skip_reason_for(&self.data, &self.settings, self.too_old)
    }

    /// Always a single status; oversized content is truncated
    pub fn prepare_for_post(&self, max_length: usize) -> Vec<String> {
        if self.splitter.expected_length(&self.content) <= max_length {
            vec![self.content.clone()]
        } else {
            vec![self.splitter.truncate(&self.content, &self.url, max_length)]
        }
    }
}

fn attachment(media: &TweetMedia) -> MediaAttachment {
    MediaAttachment {
        url: media.media_url.clone(),
        description: media.ext_alt_text.clone().filter(|d| !d.is_empty()),
        kind: media.kind,
        variants: if media.kind.is_video() {
            media.variants.clone()
        } else {
            Vec::new()
        },
    }
}

fn normalize(
    data: &TweetData,
    media: &[TweetMedia],
    url: &str,
    ctx: &MessageContext,
) -> (String, Option<String>) {
    let suffix = ctx.twitter_mention_suffix.as_str();
    let mut content_warning = None;

    let content = if let Some(retweeted) = &data.retweeted_status {
        let body = remove_media_links(&body_text(retweeted, suffix), media);
        let body = body.trim();
        let author = format!("@{}{}", retweeted.user.screen_name, suffix);

        if body.is_empty() {
            format!("RT {}\n{}\n", author, url)
        } else {
            format!("RT {}\n{}", author, body)
        }
    } else if let Some(quoted) = &data.quoted_status {
        let own = body_text(data, suffix);
        let own = trailing_status_link().replace(&own, "");
        let own = remove_media_links(&own, media);
        let own = own.trim();

        let quoted_text = remove_media_links(&body_text(quoted, suffix), media);
        let quoted_text = quoted_text.trim();
        let header = format!("{}\n---\nRT @{}{}\n", own, quoted.user.screen_name, suffix);

        let framed = format!("{}{}\n{}", header, quoted_text, url);
        let length = utf16_len(&framed);

        if length <= ctx.toot_length {
            framed
        } else {
            debug!(length, "quote too long, trimming quoted text");
            // one extra unit for the ellipsis
            let overflow = length - ctx.toot_length + 1;
            let keep = utf16_len(quoted_text).saturating_sub(overflow);
            format!("{}{}…\n{}", header, utf16_prefix(quoted_text, keep), url)
        }
    } else {
        let body = remove_media_links(&body_text(data, suffix), media);
        let (body, warning) = text::extract_content_warning(body.trim());
        content_warning = warning;
        body
    };

    let content = content.trim_start().to_string();
    if content.trim().is_empty() {
        (EMPTY_BODY.to_string(), content_warning)
    } else {
        (content, content_warning)
    }
}
