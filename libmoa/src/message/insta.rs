//! Instagram posts, cross-posted to both other networks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{MessageContext, SkipReason};
use crate::settings::Settings;
use crate::splitter::Splitter;
use crate::types::{MediaAttachment, Network};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstaData {
    /// Unix seconds; doubles as the item id
    pub created_time: i64,
    pub link: String,
    #[serde(default)]
    pub caption: Option<String>,
    /// Standard resolution image
    pub image_url: String,
}

#[derive(Debug, Clone)]
pub struct Insta {
    data: InstaData,
    settings: Settings,
    too_old: bool,
    attachments: Vec<MediaAttachment>,
    splitter: Splitter,
    content: String,
}

impl Insta {
    pub fn new(data: InstaData, settings: Settings, ctx: &MessageContext) -> Self {
        let too_old = match DateTime::<Utc>::from_timestamp(data.created_time, 0) {
            Some(created_at) => ctx.is_too_old(created_at),
            None => true,
        };
        let attachments = vec![MediaAttachment::image(data.image_url.clone(), None)];
        let content = data.caption.as_deref().unwrap_or_default().trim().to_string();

        Self {
            data,
            settings,
            too_old,
            attachments,
            splitter: Splitter::new(ctx.twitter_url_length),
            content,
        }
    }

    pub fn id(&self) -> i64 {
        self.data.created_time
    }

    pub fn url(&self) -> &str {
        &self.data.link
    }

    pub fn media_attachments(&self) -> &[MediaAttachment] {
        &self.attachments
    }

    pub fn clean_content(&self) -> &str {
        &self.content
    }

    pub fn skip_reason(&self, destination: Network) -> Option<SkipReason> {
        if self.too_old {
            return Some(SkipReason::TooOld);
        }

        let enabled = match destination {
            Network::Twitter => self.settings.instagram_post_to_twitter,
            Network::Mastodon => self.settings.instagram_post_to_mastodon,
            Network::Instagram => false,
        };

        if enabled {
            None
        } else {
            Some(SkipReason::PostingDisabled)
        }
    }

    /// Caption followed by the post link, truncated to fit
    pub fn prepare_for_post(&self, max_length: usize) -> Vec<String> {
        let link = &self.data.link;

        if self.content.is_empty() {
            return vec![link.clone()];
        }

        let full = format!("{}\n{}", self.content, link);
        if self.splitter.expected_length(&full) <= max_length {
            vec![full]
        } else {
            vec![self.splitter.truncate(&self.content, link, max_length)]
        }
    }
}
