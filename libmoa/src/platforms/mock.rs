//! Mock network port for testing
//!
//! A [`MockPlatform`] serves a scripted timeline and records everything
//! posted or uploaded through it. Clones share state, so a test can keep a
//! handle while the worker owns another one.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bridge::Bridge;
use crate::error::{PlatformError, Result};
use crate::host::MastodonHost;
use crate::message::Item;
use crate::platforms::{Connections, Platform, PlatformFactory};
use crate::types::{MediaUpload, Network, PostRequest};

#[derive(Debug, Default)]
struct MockState {
    timeline: Vec<Item>,
    details: HashMap<String, Item>,
    fetch_errors: VecDeque<PlatformError>,
    post_errors: VecDeque<PlatformError>,
    upload_errors: VecDeque<PlatformError>,
    fetch_calls: Vec<i64>,
    posts: Vec<PostRequest>,
    uploads: Vec<MediaUpload>,
    next_id: u64,
}

#[derive(Debug, Clone)]
pub struct MockPlatform {
    name: String,
    network: Network,
    state: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    /// Posted ids count up from 1000
    pub fn new(network: Network) -> Self {
        Self {
            name: format!("mock-{}", network),
            network,
            state: Arc::new(Mutex::new(MockState {
                next_id: 1000,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the timeline; items are served as given, newest first
    pub fn set_timeline(&self, items: Vec<Item>) {
        self.state().timeline = items;
    }

    pub fn add_detail(&self, id: impl Into<String>, item: Item) {
        self.state().details.insert(id.into(), item);
    }

    pub fn fail_next_fetch(&self, error: PlatformError) {
        self.state().fetch_errors.push_back(error);
    }

    pub fn fail_next_post(&self, error: PlatformError) {
        self.state().post_errors.push_back(error);
    }

    pub fn fail_next_upload(&self, error: PlatformError) {
        self.state().upload_errors.push_back(error);
    }

    /// `since_id` of every timeline fetch, in call order
    pub fn fetch_calls(&self) -> Vec<i64> {
        self.state().fetch_calls.clone()
    }

    pub fn posts(&self) -> Vec<PostRequest> {
        self.state().posts.clone()
    }

    pub fn posted_texts(&self) -> Vec<String> {
        self.state().posts.iter().map(|p| p.text.clone()).collect()
    }

    pub fn uploads(&self) -> Vec<MediaUpload> {
        self.state().uploads.clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn network(&self) -> Network {
        self.network
    }

    async fn fetch_timeline(&self, since_id: i64) -> Result<Vec<Item>> {
        let mut state = self.state();
        state.fetch_calls.push(since_id);

        if let Some(error) = state.fetch_errors.pop_front() {
            return Err(error.into());
        }

        Ok(state.timeline.clone())
    }

    async fn post_item(&self, request: &PostRequest) -> Result<String> {
        let mut state = self.state();

        if let Some(error) = state.post_errors.pop_front() {
            return Err(error.into());
        }

        state.next_id += 1;
        state.posts.push(request.clone());
        Ok(state.next_id.to_string())
    }

    async fn upload_media(&self, upload: &MediaUpload) -> Result<String> {
        let mut state = self.state();

        if let Some(error) = state.upload_errors.pop_front() {
            return Err(error.into());
        }

        state.uploads.push(upload.clone());
        Ok(format!("media-{}", state.uploads.len()))
    }

    async fn fetch_item_detail(&self, id: &str) -> Result<Item> {
        self.state()
            .details
            .get(id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("no item {}", id)).into())
    }
}

/// Hands every bridge the same set of mock ports
#[derive(Clone)]
pub struct MockFactory {
    connections: Connections,
    connect_calls: Arc<Mutex<Vec<i64>>>,
}

impl MockFactory {
    pub fn new(
        mastodon: Option<MockPlatform>,
        twitter: Option<MockPlatform>,
        instagram: Option<MockPlatform>,
    ) -> Self {
        fn port(platform: Option<MockPlatform>) -> Option<Arc<dyn Platform>> {
            platform.map(|p| Arc::new(p) as Arc<dyn Platform>)
        }

        Self {
            connections: Connections {
                mastodon: port(mastodon),
                twitter: port(twitter),
                instagram: port(instagram),
            },
            connect_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Ids of the bridges connected so far
    pub fn connect_calls(&self) -> Vec<i64> {
        self.connect_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PlatformFactory for MockFactory {
    async fn connect(&self, bridge: &Bridge, _host: Option<&MastodonHost>) -> Result<Connections> {
        if let Ok(mut calls) = self.connect_calls.lock() {
            calls.push(bridge.id);
        }

        // only hand out ports the bridge has credentials for
        Ok(Connections {
            mastodon: self.connections.mastodon.clone().filter(|_| bridge.mastodon.is_some()),
            twitter: self.connections.twitter.clone().filter(|_| bridge.twitter.is_some()),
            instagram: self
                .connections
                .instagram
                .clone()
                .filter(|_| bridge.instagram.is_some()),
        })
    }
}
