//! Network ports
//!
//! Each social network is reached through the [`Platform`] trait. A platform
//! value is bound to one bridge's account when it is created by a
//! [`PlatformFactory`], so calls only carry per-request data. Wire formats
//! belong to the adapter behind the trait.

use async_trait::async_trait;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::error::{PlatformError, Result};
use crate::host::MastodonHost;
use crate::message::Item;
use crate::types::{MediaUpload, Network, PostRequest};

// Mock platform is available for all builds to support integration tests
pub mod mock;

#[async_trait]
pub trait Platform: Send + Sync {
    /// Short identifier used in log lines
    fn name(&self) -> &str;

    fn network(&self) -> Network;

    /// Items newer than `since_id`, newest first
    ///
    /// A `since_id` of zero means no cursor.
    async fn fetch_timeline(&self, since_id: i64) -> Result<Vec<Item>>;

    /// Publish a post and return its id on this network
    async fn post_item(&self, request: &PostRequest) -> Result<String>;

    /// Upload a media file and return the id to attach to a post
    async fn upload_media(&self, _upload: &MediaUpload) -> Result<String> {
        Err(PlatformError::NotImplemented(format!("{} does not accept media", self.name())).into())
    }

    /// Full view of a single item, including attachment metadata
    async fn fetch_item_detail(&self, _id: &str) -> Result<Item> {
        Err(
            PlatformError::NotImplemented(format!("{} has no item detail lookup", self.name()))
                .into(),
        )
    }
}

/// The ports a bridge is connected to for one run
#[derive(Clone, Default)]
pub struct Connections {
    pub mastodon: Option<Arc<dyn Platform>>,
    pub twitter: Option<Arc<dyn Platform>>,
    pub instagram: Option<Arc<dyn Platform>>,
}

impl Connections {
    pub fn get(&self, network: Network) -> Option<&Arc<dyn Platform>> {
        match network {
            Network::Mastodon => self.mastodon.as_ref(),
            Network::Twitter => self.twitter.as_ref(),
            Network::Instagram => self.instagram.as_ref(),
        }
    }
}

/// Builds the ports for a bridge from its stored credentials
#[async_trait]
pub trait PlatformFactory: Send + Sync {
    /// `host` is the bridge's Mastodon host, when it has one
    async fn connect(&self, bridge: &Bridge, host: Option<&MastodonHost>) -> Result<Connections>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    #[async_trait]
    impl Platform for Bare {
        fn name(&self) -> &str {
            "bare"
        }

        fn network(&self) -> Network {
            Network::Twitter
        }

        async fn fetch_timeline(&self, _since_id: i64) -> Result<Vec<Item>> {
            Ok(Vec::new())
        }

        async fn post_item(&self, _request: &PostRequest) -> Result<String> {
            Ok("1".to_string())
        }
    }

    #[tokio::test]
    async fn test_default_methods_are_not_implemented() {
        let platform = Bare;

        let err = platform.fetch_item_detail("1").await.unwrap_err();
        assert!(matches!(
            err.platform(),
            Some(PlatformError::NotImplemented(_))
        ));

        let upload = MediaUpload {
            path: std::path::PathBuf::from("/tmp/x.png"),
            mime_type: "image/png".to_string(),
            description: None,
            kind: crate::types::MediaKind::Image,
        };
        assert!(platform.upload_media(&upload).await.is_err());
    }

    #[test]
    fn test_connections_lookup() {
        let connections = Connections {
            twitter: Some(Arc::new(Bare)),
            ..Default::default()
        };

        assert!(connections.get(Network::Twitter).is_some());
        assert!(connections.get(Network::Mastodon).is_none());
    }
}
