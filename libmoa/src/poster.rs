//! Posting one message to one destination network
//!
//! A [`Poster`] configured for Mastodon is a toot poster, one configured for
//! Twitter is a tweet poster. Both run the same steps: skip check, content
//! preparation, reply resolution, attachment transfer, send with retry, and
//! finally the mapping and watermark bookkeeping.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::attachments::{AttachmentTransfer, MediaSource};
use crate::bridge::Bridge;
use crate::config::Config;
use crate::db::Database;
use crate::error::{MoaError, Result};
use crate::message::Message;
use crate::platforms::Platform;
use crate::retry::{classify, send_with_retry, Disposition, RetryPolicy, SendOutcome, Sleeper};
use crate::types::{Mapping, Network, PostRequest};

/// Destination network and its length budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationProfile {
    pub network: Network,
    pub max_length: usize,
}

impl DestinationProfile {
    /// Posting to Mastodon
    pub fn toot(config: &Config) -> Self {
        Self {
            network: Network::Mastodon,
            max_length: config.limits.toot_length,
        }
    }

    /// Posting to Twitter
    pub fn tweet(config: &Config) -> Self {
        Self {
            network: Network::Twitter,
            max_length: config.limits.tweet_length,
        }
    }
}

pub struct Poster<'a> {
    profile: DestinationProfile,
    destination: &'a dyn Platform,
    db: &'a Database,
    media_source: &'a dyn MediaSource,
    sleeper: &'a dyn Sleeper,
    retry: RetryPolicy,
    max_video_bytes: u64,
    send: bool,
}

impl<'a> Poster<'a> {
    pub fn new(
        config: &Config,
        profile: DestinationProfile,
        destination: &'a dyn Platform,
        db: &'a Database,
        media_source: &'a dyn MediaSource,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            profile,
            destination,
            db,
            media_source,
            sleeper,
            retry: RetryPolicy::from_config(&config.retry),
            max_video_bytes: config.media.max_video_bytes,
            send: config.worker.send,
        }
    }

    pub fn profile(&self) -> DestinationProfile {
        self.profile
    }

    /// Post `message`, updating `bridge` on success
    ///
    /// Returns `Ok(true)` when the message was delivered (or the destination
    /// already held it). Item level failures return `Ok(false)`; a failure
    /// that invalidates the bridge also disables and persists it. Only store
    /// errors are returned as `Err`.
    pub async fn post(&self, message: &Message, bridge: &mut Bridge) -> Result<bool> {
        let destination = self.profile.network;

        if message.network() == destination {
            return Err(MoaError::InvalidInput(format!(
                "cannot cross-post a {} item to {}",
                message.network(),
                destination
            )));
        }

        if let Some(reason) = message.skip_reason(destination) {
            debug!("Skipping {} {}: {}", message.network(), message.id(), reason);
            return Ok(false);
        }

        let parts = message.prepare_for_post(self.profile.max_length);
        if parts.is_empty() {
            return Ok(false);
        }

        if !self.send {
            for part in &parts {
                info!("Dry run, would post to {}: {}", destination, part);
            }
            return Ok(false);
        }

        let mut reply_to = None;
        if message.is_self_reply() {
            let parent = match message.in_reply_to_id() {
                Some(parent) => parent,
                None => return Ok(false),
            };

            match self
                .db
                .latest_mapping(message.network(), &parent, destination)
                .await?
            {
                Some(mapping) => reply_to = Some(mapping.destination_id),
                None => {
                    info!(
                        "Skipping reply to {} {}: parent was never posted to {}",
                        message.network(),
                        parent,
                        destination
                    );
                    return Ok(false);
                }
            }
        }

        let media_ids = if message.media_behind_link() {
            Vec::new()
        } else {
            let transfer = AttachmentTransfer::new(self.media_source, self.max_video_bytes);
            match transfer
                .transfer_all(message.media_attachments(), self.destination)
                .await
            {
                Ok(ids) => ids,
                Err(e) => return self.fail(e, bridge).await,
            }
        };

        let last = parts.len() - 1;
        let mut posted = Vec::with_capacity(parts.len());

        for (index, part) in parts.iter().enumerate() {
            let request = self.request(
                message,
                bridge,
                part,
                if index == last { media_ids.clone() } else { Vec::new() },
                reply_to.clone(),
            );

            let outcome = send_with_retry(&self.retry, self.sleeper, self.destination.name(), || {
                self.destination.post_item(&request)
            })
            .await;

            match outcome {
                SendOutcome::Posted(id) => {
                    reply_to = Some(id.clone());
                    posted.push(id);
                }
                SendOutcome::Duplicate => {
                    // thread on under the copy the destination already holds
                    match self.delivered_parts(message).await?.get(index) {
                        Some(existing) => {
                            reply_to = Some(existing.clone());
                            posted.push(existing.clone());
                        }
                        None => debug!(
                            "No earlier id for part {}/{} of {} {}; threading under the previous part",
                            index + 1,
                            parts.len(),
                            message.network(),
                            message.id()
                        ),
                    }
                }
                SendOutcome::DisableBridge(e) => return self.fail(e, bridge).await,
                SendOutcome::Skipped(e) | SendOutcome::Exhausted(e) => {
                    warn!(
                        "Giving up on {} {} after part {}/{}: {}",
                        message.network(),
                        message.id(),
                        index + 1,
                        parts.len(),
                        e
                    );
                    return Ok(false);
                }
            }
        }

        self.record_success(message, bridge, &posted).await?;
        Ok(true)
    }

    fn request(
        &self,
        message: &Message,
        bridge: &Bridge,
        text: &str,
        media_ids: Vec<String>,
        in_reply_to_id: Option<String>,
    ) -> PostRequest {
        let settings = &bridge.settings;

        let (visibility, content_warning) = match self.profile.network {
            Network::Mastodon => {
                let warning = message
                    .content_warning()
                    .map(str::to_string)
                    .or_else(|| {
                        settings
                            .tweets_behind_cw
                            .then(|| settings.tweet_cw_text.clone())
                    });
                (Some(settings.toot_visibility), warning)
            }
            Network::Twitter | Network::Instagram => (None, None),
        };

        PostRequest {
            text: text.to_string(),
            media_ids,
            in_reply_to_id,
            visibility,
            sensitive: message.is_sensitive(),
            content_warning,
        }
    }

    /// Destination ids of the most recent full delivery of `message`, in part order
    async fn delivered_parts(&self, message: &Message) -> Result<Vec<String>> {
        let mappings: Vec<Mapping> = self
            .db
            .mappings_for_source(message.network(), &message.id())
            .await?
            .into_iter()
            .filter(|m| m.destination_network == self.profile.network)
            .collect();

        let Some(latest) = mappings.first().map(|m| m.created_at) else {
            return Ok(Vec::new());
        };

        // newest first; one delivery shares a timestamp
        Ok(mappings
            .into_iter()
            .filter(|m| m.created_at == latest)
            .rev()
            .map(|m| m.destination_id)
            .collect())
    }

    async fn record_success(
        &self,
        message: &Message,
        bridge: &mut Bridge,
        posted: &[String],
    ) -> Result<()> {
        let now = Utc::now();
        let source_id = message.id();

        // all parts share a timestamp; insertion order makes the last part newest
        for destination_id in posted {
            self.db
                .record_mapping(&Mapping {
                    id: None,
                    source_network: message.network(),
                    source_id: source_id.clone(),
                    destination_network: self.profile.network,
                    destination_id: destination_id.clone(),
                    created_at: now.timestamp_millis(),
                })
                .await?;
        }

        bridge.advance_watermark_str(message.network(), &source_id);
        if let Some(last) = posted.last() {
            bridge.advance_watermark_str(self.profile.network, last);
        }
        bridge.updated_at = Some(now);
        self.db.update_bridge(bridge).await?;

        info!(
            "Posted {} {} to {} as {:?}",
            message.network(),
            source_id,
            self.profile.network,
            posted
        );
        Ok(())
    }

    /// Handle a failure outside the retry loop
    async fn fail(&self, error: MoaError, bridge: &mut Bridge) -> Result<bool> {
        match classify(&error) {
            Disposition::DisableBridge => {
                warn!(
                    "Disabling bridge {}: {} rejected its credentials: {}",
                    bridge.id, self.profile.network, error
                );
                bridge.disable(self.profile.network);
                self.db.update_bridge(bridge).await?;
            }
            _ => warn!("Skipping item: {}", error),
        }
        Ok(false)
    }
}
