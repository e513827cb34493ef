//! Core types shared across the sync pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A social network a bridge can be connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mastodon,
    Twitter,
    Instagram,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mastodon => "mastodon",
            Network::Twitter => "twitter",
            Network::Instagram => "instagram",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mastodon" => Ok(Network::Mastodon),
            "twitter" => Ok(Network::Twitter),
            "instagram" => Ok(Network::Instagram),
            other => Err(format!("Unknown network: {}", other)),
        }
    }
}

/// Mastodon status visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
    Direct,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Unlisted => "unlisted",
            Visibility::Private => "private",
            Visibility::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    #[default]
    #[serde(alias = "photo")]
    Image,
    Video,
    AnimatedGif,
}

impl MediaKind {
    pub fn is_video(&self) -> bool {
        matches!(self, MediaKind::Video | MediaKind::AnimatedGif)
    }
}

/// One encoding of a video attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoVariant {
    pub url: String,
    #[serde(default)]
    pub bitrate: Option<u64>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// A media item attached to a source message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub url: String,
    pub description: Option<String>,
    pub kind: MediaKind,
    /// Alternative encodings; only populated for videos
    pub variants: Vec<VideoVariant>,
}

impl MediaAttachment {
    pub fn image(url: impl Into<String>, description: Option<String>) -> Self {
        Self {
            url: url.into(),
            description,
            kind: MediaKind::Image,
            variants: Vec::new(),
        }
    }
}

/// A persisted cross reference between a source item and the post it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub id: Option<i64>,
    pub source_network: Network,
    pub source_id: String,
    pub destination_network: Network,
    pub destination_id: String,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
}

/// A post to be created through a network port
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostRequest {
    pub text: String,
    pub media_ids: Vec<String>,
    pub in_reply_to_id: Option<String>,
    pub visibility: Option<Visibility>,
    pub sensitive: bool,
    pub content_warning: Option<String>,
}

/// A downloaded media file handed to a network port for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub path: PathBuf,
    pub mime_type: String,
    pub description: Option<String>,
    pub kind: MediaKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_round_trip_through_str() {
        for network in [Network::Mastodon, Network::Twitter, Network::Instagram] {
            assert_eq!(network.as_str().parse::<Network>().unwrap(), network);
        }
        assert!("myspace".parse::<Network>().is_err());
    }

    #[test]
    fn test_visibility_deserializes_lowercase() {
        let v: Visibility = serde_json::from_str("\"unlisted\"").unwrap();
        assert_eq!(v, Visibility::Unlisted);
        assert_eq!(Visibility::Direct.as_str(), "direct");
    }

    #[test]
    fn test_media_kind_video() {
        assert!(MediaKind::Video.is_video());
        assert!(MediaKind::AnimatedGif.is_video());
        assert!(!MediaKind::Image.is_video());
    }
}
