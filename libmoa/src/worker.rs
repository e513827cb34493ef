//! Sync orchestration
//!
//! A [`Worker`] processes every enabled bridge of one shard, strictly one
//! bridge at a time. For each bridge it fetches what is new on every linked
//! network, keeps the newest items up to the per-run cap, and feeds them
//! oldest first through the posters the bridge's settings call for.
//!
//! The watermark for a network is advanced to the newest fetched id as soon
//! as the batch is fetched, before anything is posted. A crash in the middle
//! of a batch can therefore lose the unposted remainder, but never re-posts
//! what already went out.

use chrono::{DateTime, Duration, Utc};
use std::cmp::Reverse;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::attachments::{HttpMediaSource, MediaSource};
use crate::bridge::Bridge;
use crate::config::Config;
use crate::db::Database;
use crate::error::{MoaError, Result};
use crate::host::{DeferOutcome, DeferPolicy, MastodonHost};
use crate::message::tweet::{self, TweetMedia};
use crate::message::{Insta, Item, Message, MessageContext, Toot, Tweet};
use crate::platforms::{Connections, Platform, PlatformFactory};
use crate::poster::{DestinationProfile, Poster};
use crate::retry::{Sleeper, TokioSleeper};
use crate::stats::{BridgeStat, WorkerStat};
use crate::types::Network;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

/// Asks the worker to stop between bridges
pub trait PauseSignal: Send + Sync {
    fn is_paused(&self) -> bool;
}

/// Pause while a sentinel file exists
#[derive(Debug, Clone)]
pub struct StopFile {
    path: PathBuf,
}

impl StopFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(shellexpand::tilde(&config.worker.stop_file).to_string())
    }
}

impl PauseSignal for StopFile {
    fn is_paused(&self) -> bool {
        self.path.exists()
    }
}

/// Operator notification triggers for host deferral
///
/// Delivery is up to the implementation.
pub trait DeferralNotifier: Send + Sync {
    /// `host` has just been backed off for one window
    fn deferred(&self, host: &MastodonHost);

    /// `host` kept failing and `disabled` bridges on it were turned off
    fn defer_failed(&self, host: &MastodonHost, disabled: u64);
}

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl DeferralNotifier for LogNotifier {
    fn deferred(&self, host: &MastodonHost) {
        warn!(
            "Host {} deferred until {:?} (strike {})",
            host.hostname, host.defer_until, host.defer_count
        );
    }

    fn defer_failed(&self, host: &MastodonHost, disabled: u64) {
        error!(
            "Host {} kept failing; disabled {} bridge(s)",
            host.hostname, disabled
        );
    }
}

/// What a fetch produced for one network
enum Fetched {
    Items(Vec<Item>),
    /// Nothing fetched and nothing more to do for this bridge
    StopBridge,
}

pub struct Worker {
    config: Config,
    db: Database,
    factory: Arc<dyn PlatformFactory>,
    media_source: Arc<dyn MediaSource>,
    sleeper: Arc<dyn Sleeper>,
    pause: Arc<dyn PauseSignal>,
    notifier: Arc<dyn DeferralNotifier>,
    clock: Arc<dyn Clock>,
}

impl Worker {
    /// Create a worker with the production collaborators
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use libmoa::config::Config;
    /// use libmoa::db::Database;
    /// use libmoa::platforms::PlatformFactory;
    /// use libmoa::worker::Worker;
    ///
    /// # async fn example(factory: Arc<dyn PlatformFactory>) -> libmoa::error::Result<()> {
    /// let config = Config::load()?;
    /// let db = Database::new(&config.database_path()).await?;
    /// let worker = Worker::new(config, db, factory)?;
    /// let stat = worker.run(1).await?;
    /// println!("{} items in {}", stat.items(), stat.formatted_time());
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: Config, db: Database, factory: Arc<dyn PlatformFactory>) -> Result<Self> {
        let media_source = HttpMediaSource::from_config(&config.media)?;
        let pause = StopFile::from_config(&config);

        Ok(Self {
            config,
            db,
            factory,
            media_source: Arc::new(media_source),
            sleeper: Arc::new(TokioSleeper),
            pause: Arc::new(pause),
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_media_source(mut self, media_source: Arc<dyn MediaSource>) -> Self {
        self.media_source = media_source;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_pause_signal(mut self, pause: Arc<dyn PauseSignal>) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn DeferralNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn sending(&self) -> bool {
        self.config.worker.send
    }

    /// Process every enabled bridge assigned to `worker_id`
    ///
    /// Failures talking to a network are handled per bridge; only store
    /// errors abort the run.
    pub async fn run(&self, worker_id: i64) -> Result<WorkerStat> {
        let run_id = Uuid::new_v4();
        let started = self.clock.now();
        let budget = self.config.worker.run_budget();
        let mut stat = WorkerStat::new(worker_id);

        let bridges = self.db.enabled_bridges(worker_id).await?;
        info!(
            "Run {} for worker {}: {} bridge(s){}",
            run_id,
            worker_id,
            bridges.len(),
            if self.sending() { "" } else { " (dry run)" }
        );

        for mut bridge in bridges {
            if (self.clock.now() - started).to_std().unwrap_or_default() >= budget {
                info!("Run budget exhausted, leaving remaining bridges for the next run");
                break;
            }

            let span = info_span!("bridge", id = bridge.id);
            let bridge_stat = self.process_bridge(&mut bridge).instrument(span).await?;

            stat.toots += bridge_stat.toots;
            stat.tweets += bridge_stat.tweets;
            stat.instas += bridge_stat.instas;

            if self.pause.is_paused() {
                info!("Pause requested, stopping after bridge {}", bridge.id);
                break;
            }
        }

        stat.elapsed = (self.clock.now() - started).to_std().unwrap_or_default();

        if self.sending() {
            self.db.record_worker_stat(&stat).await?;
        }

        info!(
            "Run {} finished: {} toot(s), {} tweet(s), {} insta(s) in {}",
            run_id,
            stat.toots,
            stat.tweets,
            stat.instas,
            stat.formatted_time()
        );

        Ok(stat)
    }

    /// Sync one bridge
    pub async fn process_bridge(&self, bridge: &mut Bridge) -> Result<BridgeStat> {
        let mut stat = BridgeStat::new(bridge.id);
        let now = self.clock.now();

        let host_id = match bridge.mastodon_host_id() {
            Some(host_id) => host_id,
            None => {
                warn!("Bridge {} has no Mastodon account, disabling", bridge.id);
                bridge.enabled = false;
                self.persist(bridge).await?;
                return Ok(stat);
            }
        };

        let mut host = match self.db.get_host(host_id).await? {
            Some(host) => host,
            None => {
                warn!("Bridge {} points at missing host {}, disabling", bridge.id, host_id);
                bridge.disable(Network::Mastodon);
                self.persist(bridge).await?;
                return Ok(stat);
            }
        };

        if host.is_deferred(now) {
            info!("Skipping {}: host {} is deferred", bridge.label(), host.hostname);
            return Ok(stat);
        }

        let connections = match self.factory.connect(bridge, Some(&host)).await {
            Ok(connections) => connections,
            Err(e) => {
                error!("Could not connect {}: {}", bridge.label(), e);
                return Ok(stat);
            }
        };

        debug!("Processing {}", bridge.label());
        let settings = bridge.settings.clone();

        let toots = match connections.mastodon.as_deref() {
            Some(port) if settings.post_to_twitter_enabled() && bridge.twitter.is_some() => {
                match self.fetch(bridge, port).await {
                    Ok(items) => {
                        if host.defer_count > 0 || host.defer_until.is_some() {
                            host.defer_reset();
                            if self.sending() {
                                self.db.save_host_state(&host).await?;
                            }
                        }
                        items
                    }
                    Err(e) => {
                        self.mastodon_fetch_failed(bridge, &mut host, now, e).await?;
                        return Ok(stat);
                    }
                }
            }
            _ => Vec::new(),
        };

        let tweets = match connections.twitter.as_deref() {
            Some(port) if settings.post_to_mastodon_enabled() => {
                match self.fetch_or_handle(bridge, port).await? {
                    Fetched::Items(items) => items,
                    Fetched::StopBridge => return Ok(stat),
                }
            }
            _ => Vec::new(),
        };

        let instas = match connections.instagram.as_deref() {
            Some(port) if settings.post_instagram_enabled() => {
                match self.fetch_or_handle(bridge, port).await? {
                    Fetched::Items(items) => items,
                    Fetched::StopBridge => return Ok(stat),
                }
            }
            _ => Vec::new(),
        };

        let ctx = MessageContext::from_config(&self.config, now);
        self.post_items(bridge, &connections, &ctx, toots, tweets, instas, &mut stat)
            .await?;

        if self.sending() {
            bridge.updated_at = Some(Utc::now());
            self.db.update_bridge(bridge).await?;

            if stat.items() > 0 {
                self.db.record_bridge_stat(&stat).await?;
            }
        }

        Ok(stat)
    }

    #[allow(clippy::too_many_arguments)]
    async fn post_items(
        &self,
        bridge: &mut Bridge,
        connections: &Connections,
        ctx: &MessageContext,
        toots: Vec<Item>,
        tweets: Vec<Item>,
        instas: Vec<Item>,
        stat: &mut BridgeStat,
    ) -> Result<()> {
        let to_twitter = connections
            .twitter
            .as_deref()
            .map(|port| self.poster(DestinationProfile::tweet(&self.config), port));
        let to_mastodon = connections
            .mastodon
            .as_deref()
            .map(|port| self.poster(DestinationProfile::toot(&self.config), port));

        if !toots.is_empty() {
            info!("{} new toot(s)", toots.len());
        }
        for item in toots {
            if !bridge.enabled {
                return Ok(());
            }
            let (Item::Toot(data), Some(poster)) = (item, &to_twitter) else {
                continue;
            };

            let message = Message::Toot(Toot::new(data, bridge.settings.clone(), ctx));
            if poster.post(&message, bridge).await? {
                stat.add_toot();
            }
        }

        if !tweets.is_empty() {
            info!("{} new tweet(s)", tweets.len());
        }
        for item in tweets {
            if !bridge.enabled {
                return Ok(());
            }
            let (Item::Tweet(data), Some(poster)) = (item, &to_mastodon) else {
                continue;
            };

            if let Some(reason) = tweet::would_skip(&data, &bridge.settings, ctx) {
                debug!("Skipping tweet {}: {}", data.id, reason);
                continue;
            }

            let media = match connections.twitter.as_deref() {
                Some(port) => tweet_media(port, data.media_target_id()).await,
                None => Vec::new(),
            };
            let message = Message::Tweet(Tweet::new(data, media, bridge.settings.clone(), ctx));
            if poster.post(&message, bridge).await? {
                stat.add_tweet();
            }
        }

        if !instas.is_empty() {
            info!("{} new insta(s)", instas.len());
        }
        for item in instas {
            if !bridge.enabled {
                return Ok(());
            }
            let Item::Insta(data) = item else {
                continue;
            };

            let message = Message::Insta(Insta::new(data, bridge.settings.clone(), ctx));
            let mut posted = false;
            for poster in [&to_twitter, &to_mastodon].into_iter().flatten() {
                if !bridge.enabled {
                    break;
                }
                posted |= poster.post(&message, bridge).await?;
            }
            if posted {
                stat.add_insta();
            }
        }

        Ok(())
    }

    fn poster<'a>(&'a self, profile: DestinationProfile, port: &'a dyn Platform) -> Poster<'a> {
        Poster::new(
            &self.config,
            profile,
            port,
            &self.db,
            self.media_source.as_ref(),
            self.sleeper.as_ref(),
        )
    }

    /// New items from `port`, newest `max_messages_per_run` only, oldest first
    async fn fetch(&self, bridge: &mut Bridge, port: &dyn Platform) -> Result<Vec<Item>> {
        let network = port.network();
        let watermark = bridge.watermark(network);

        let fetched = port.fetch_timeline(watermark).await?;
        let mut items: Vec<(i64, Item)> = fetched
            .into_iter()
            .filter_map(|item| match item.sequence_id() {
                Some(id) if id > watermark => Some((id, item)),
                Some(_) => None,
                None => {
                    debug!("Dropping {} item without a numeric id", network);
                    None
                }
            })
            .collect();

        items.sort_by_key(|(id, _)| Reverse(*id));

        let cap = self.config.worker.max_messages_per_run;
        if items.len() > cap {
            info!(
                "{} returned {} new items, keeping the newest {}",
                port.name(),
                items.len(),
                cap
            );
            items.truncate(cap);
        }

        if let Some((newest, _)) = items.first() {
            bridge.advance_watermark(network, *newest);
        }

        Ok(items.into_iter().rev().map(|(_, item)| item).collect())
    }

    /// Fetch from Twitter or Instagram, handling failures in place
    async fn fetch_or_handle(&self, bridge: &mut Bridge, port: &dyn Platform) -> Result<Fetched> {
        let network = port.network();

        let error = match self.fetch(bridge, port).await {
            Ok(items) => return Ok(Fetched::Items(items)),
            Err(e) => e,
        };

        let permanent = error
            .platform()
            .map(|e| e.is_permanent_for_bridge())
            .unwrap_or(false);

        match (network, permanent) {
            (Network::Instagram, true) => {
                warn!("Instagram rejected {}: {}; unlinking it", bridge.label(), error);
                bridge.clear_credentials(Network::Instagram);
                self.persist(bridge).await?;
                Ok(Fetched::Items(Vec::new()))
            }
            (_, true) => {
                warn!("{} rejected {}: {}; disabling", network, bridge.label(), error);
                bridge.disable(network);
                self.persist(bridge).await?;
                Ok(Fetched::StopBridge)
            }
            (_, false) => {
                error!("Fetching {} for {} failed: {}", network, bridge.label(), error);
                Ok(Fetched::StopBridge)
            }
        }
    }

    async fn mastodon_fetch_failed(
        &self,
        bridge: &mut Bridge,
        host: &mut MastodonHost,
        now: DateTime<Utc>,
        error: MoaError,
    ) -> Result<()> {
        let platform = error.platform();

        if platform.map(|e| e.is_account_rejection()).unwrap_or(false) {
            warn!("Mastodon rejected {}: {}; disabling", bridge.label(), error);
            bridge.disable(Network::Mastodon);
            return self.persist(bridge).await;
        }

        if !platform.map(|e| e.is_transient()).unwrap_or(false) {
            error!("Fetching Mastodon for {} failed: {}", bridge.label(), error);
            return Ok(());
        }

        warn!("Host {} failed: {}", host.hostname, error);
        if !self.sending() {
            return Ok(());
        }

        let policy = DeferPolicy::from_config(&self.config.defer);
        let outcome = host.defer(now, &policy);
        self.db.save_host_state(host).await?;

        match outcome {
            DeferOutcome::Deferred => {
                if self.config.notifications.notify_deferred {
                    self.notifier.deferred(host);
                }
            }
            DeferOutcome::Failed => {
                let disabled = self.db.disable_bridges_on_host(host.id).await?;
                bridge.disable(Network::Mastodon);
                if self.config.notifications.notify_defer_failed {
                    self.notifier.defer_failed(host, disabled);
                }
            }
        }

        Ok(())
    }

    async fn persist(&self, bridge: &Bridge) -> Result<()> {
        if self.sending() {
            self.db.update_bridge(bridge).await?;
        }
        Ok(())
    }
}

/// Attachment metadata for a tweet; lookup failures mean no media
async fn tweet_media(port: &dyn Platform, target_id: u64) -> Vec<TweetMedia> {
    match port.fetch_item_detail(&target_id.to_string()).await {
        Ok(Item::Tweet(detail)) => detail.media,
        Ok(_) => Vec::new(),
        Err(e) => {
            warn!("No media for tweet {}: {}", target_id, e);
            Vec::new()
        }
    }
}
