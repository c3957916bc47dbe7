use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use hashbrown::HashSet;
use nrelay::{
    kind, Event, Filter, NoteId, Phase, PoolHealth, PublishReport, Pubkey, RelayDescriptor,
    RelayPool, Signer, UnsignedEvent,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::EventCache;
use crate::config::FeedConfig;
use crate::notification::{Notification, NotificationSender};
use crate::profile::{Profile, ProfileMetadata};
use crate::time::{time_ago_since, unix_time_secs};
use crate::{Error, Result};

/// What to announce while merging events into the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Store only
    Silent,
    /// Announce events the cache had not seen
    NewOnly,
    /// Also announce re-observed events as refreshed
    WithReposts,
}

/// Who the orchestrator acts as. Without a signer it can read but not
/// publish.
#[derive(Clone, Default)]
pub struct Identity {
    pub pubkey: Option<Pubkey>,
    pub signer: Option<Arc<dyn Signer>>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn read_only(pubkey: Pubkey) -> Self {
        Identity {
            pubkey: Some(pubkey),
            signer: None,
        }
    }

    pub fn with_signer(signer: Arc<dyn Signer>) -> Self {
        Identity {
            pubkey: Some(signer.pubkey()),
            signer: Some(signer),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("pubkey", &self.pubkey)
            .field("can_sign", &self.signer.is_some())
            .finish()
    }
}

/// A signed event and where it landed
#[derive(Debug, Clone)]
pub struct Published {
    pub event: Event,
    pub report: PublishReport,
}

struct FeedState {
    following: Vec<Pubkey>,
    /// `since` of the next feed refresh
    last_refresh: u64,
    /// `subscribe_feed` was called and not cancelled since
    feed_wanted: bool,
    feed: Option<JoinHandle<()>>,
    maintenance: Option<JoinHandle<()>>,
}

/// Domain-level queries over the relay pool, merged into the cache.
///
/// Only the pool talks to relays, and only the cache decides whether an
/// event is new. Notifications go out on an unbounded channel; a closed
/// receiver just means nobody is watching.
pub struct Orchestrator {
    pool: Arc<RelayPool>,
    cache: Arc<EventCache>,
    notifier: NotificationSender,
    identity: Identity,
    config: FeedConfig,
    state: Mutex<FeedState>,
}

impl Orchestrator {
    pub fn new(
        pool: Arc<RelayPool>,
        cache: Arc<EventCache>,
        identity: Identity,
        config: FeedConfig,
        notifier: NotificationSender,
    ) -> Self {
        let last_refresh = unix_time_secs().saturating_sub(config.initial_window_secs);
        Orchestrator {
            pool,
            cache,
            notifier,
            identity,
            config,
            state: Mutex::new(FeedState {
                following: Vec::new(),
                last_refresh,
                feed_wanted: false,
                feed: None,
                maintenance: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pool(&self) -> &Arc<RelayPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<EventCache> {
        &self.cache
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn following(&self) -> Vec<Pubkey> {
        self.lock().following.clone()
    }

    pub fn last_refresh(&self) -> u64 {
        self.lock().last_refresh
    }

    /// Whether a feed subscription is wanted. Its relays may have dropped
    /// it since; maintenance reopens it.
    pub fn is_feed_active(&self) -> bool {
        self.lock().feed_wanted
    }

    fn set_following(&self, following: Vec<Pubkey>) {
        let set: HashSet<Pubkey> = following.iter().copied().collect();
        self.lock().following = following;
        self.cache.set_following(&set);
    }

    fn notify(&self, notification: Notification) {
        if self.notifier.send(notification).is_err() {
            debug!("no one is listening for notifications");
        }
    }

    /// Put one event into the cache and announce it per `policy`. Returns
    /// whether the cache had not seen it before.
    #[profiling::function]
    pub fn merge_event(&self, mut event: Event, policy: MergePolicy) -> bool {
        event
            .extra
            .set("when", time_ago_since(event.created_at));

        let is_new = self.cache.put(event.clone());
        match (policy, is_new) {
            (MergePolicy::Silent, _) | (MergePolicy::NewOnly, false) => {}
            (_, true) => self.notify(Notification::NewEvent(event)),
            (MergePolicy::WithReposts, false) => {
                let merged = self.cache.get(&event.id).unwrap_or(event);
                self.notify(Notification::RefreshedEvent(merged));
            }
        }
        is_new
    }

    /// Accounts `pk` follows, from the newest contact list any relay has.
    /// Unparseable `p` tags are skipped, duplicates dropped.
    pub async fn contact_list(&self, pk: &Pubkey) -> Vec<Pubkey> {
        let filter = Filter::new().authors([*pk]).kinds([kind::CONTACT_LIST]);
        let events = self.pool.query(&filter).collect().await;

        let Some(newest) = events
            .into_iter()
            .filter(|ev| ev.kind == kind::CONTACT_LIST && ev.pubkey == *pk)
            .max_by_key(|ev| ev.created_at)
        else {
            info!("no contact list found for {pk}");
            return Vec::new();
        };

        let mut follows = Vec::new();
        for value in newest.tag_values("p") {
            match Pubkey::from_hex(value) {
                Ok(followed) if !follows.contains(&followed) => follows.push(followed),
                Ok(_) => {}
                Err(err) => debug!("skipping p tag {value:?} in {}: {err}", newest.id),
            }
        }

        debug!(
            "contact list {} for {pk} follows {} accounts",
            newest.id,
            follows.len()
        );
        self.cache.put(newest);
        follows
    }

    /// Reload who we follow, then their profiles
    pub async fn refresh_contact_profiles(&self) -> Vec<Pubkey> {
        let Some(pk) = self.identity.pubkey else {
            warn!("refreshing contacts without an identity");
            return Vec::new();
        };

        let following = self.contact_list(&pk).await;
        self.set_following(following.clone());

        if !following.is_empty() {
            self.fetch_profiles(&following).await;
        }
        following
    }

    /// One batched metadata query for `pks`. A profile is replaced only by
    /// newer metadata; updates to followed accounts are announced. Returns
    /// how many profiles were stored.
    pub async fn fetch_profiles(&self, pks: &[Pubkey]) -> usize {
        if pks.is_empty() {
            warn!("fetch_profiles called with no pubkeys");
            return 0;
        }

        let mut authors: Vec<Pubkey> = Vec::with_capacity(pks.len());
        for pk in pks {
            if !authors.contains(pk) {
                authors.push(*pk);
            }
        }
        debug!("fetching metadata for {} accounts", authors.len());

        let following: HashSet<Pubkey> = self.lock().following.iter().copied().collect();
        let filter = Filter::new()
            .authors(authors.iter().copied())
            .kinds([kind::METADATA])
            .limit(authors.len());

        let mut stream = self.pool.query(&filter);
        let mut stored = 0;
        while let Some(event) = stream.next().await {
            if event.kind != kind::METADATA || !authors.contains(&event.pubkey) {
                continue;
            }

            let profile =
                match Profile::from_metadata_event(&event, following.contains(&event.pubkey)) {
                    Ok(profile) => profile,
                    Err(err) => {
                        warn!("skipping metadata {} from {}: {err}", event.id, event.pubkey);
                        continue;
                    }
                };
            self.cache.put(event);

            if !self.cache.put_profile_if_newer(profile.clone()) {
                continue;
            }
            stored += 1;
            if profile.following {
                self.notify(Notification::ProfileUpdated(profile));
            }
        }

        stored
    }

    /// Notes by `pks` merged per `policy`. Returns how many were new.
    pub async fn notes_by_authors(
        &self,
        pks: &[Pubkey],
        kinds: &[u64],
        since: Option<u64>,
        limit: Option<usize>,
        policy: MergePolicy,
    ) -> usize {
        if pks.is_empty() {
            return 0;
        }

        let mut filter = Filter::new()
            .authors(pks.iter().copied())
            .kinds(kinds.iter().copied());
        if let Some(since) = since {
            filter = filter.since(since);
        }
        if let Some(limit) = limit.filter(|l| *l > 0) {
            filter = filter.limit(limit);
        }

        let mut stream = self.pool.query(&filter);
        let mut new = 0;
        while let Some(event) = stream.next().await {
            if self.merge_event(event, policy) {
                new += 1;
            }
        }

        debug!("{new} new notes from {} authors", pks.len());
        new
    }

    /// Everything followed accounts posted since the last refresh, queried
    /// in chunks of `query_chunk_size` authors
    pub async fn refresh_feed(&self, policy: MergePolicy) -> usize {
        let (following, since) = {
            let state = self.lock();
            (state.following.clone(), state.last_refresh)
        };
        if following.is_empty() {
            debug!("refresh_feed: not following anyone");
            return 0;
        }

        let started = unix_time_secs();
        let mut new = 0;
        for chunk in following.chunks(self.config.query_chunk_size.max(1)) {
            new += self
                .notes_by_authors(chunk, &self.config.feed_kinds, Some(since), None, policy)
                .await;
        }

        self.lock().last_refresh = started;
        info!("feed refreshed: {new} new events");
        new
    }

    /// Widen the window back to `reset_window_secs` and refresh, announcing
    /// everything in it again
    pub async fn refresh_feed_reset(&self) -> usize {
        self.lock().last_refresh = unix_time_secs().saturating_sub(self.config.reset_window_secs);
        self.refresh_feed(MergePolicy::WithReposts).await
    }

    /// Text notes by id. Results are cached silently and returned once each.
    pub async fn notes_by_ids(&self, ids: &[NoteId]) -> Vec<Event> {
        if ids.is_empty() {
            return Vec::new();
        }

        let filter = Filter::new()
            .ids(ids.iter().copied())
            .kinds([kind::TEXT_NOTE]);

        let mut stream = self.pool.query(&filter);
        let mut events: Vec<Event> = Vec::new();
        while let Some(event) = stream.next().await {
            self.merge_event(event.clone(), MergePolicy::Silent);
            if !events.iter().any(|e| e.id == event.id) {
                events.push(event);
            }
        }

        debug!("notes_by_ids: {} of {} found", events.len(), ids.len());
        events
    }

    /// Profiles referenced by `p` tags on a cached event. Cache misses are
    /// fetched in one batch; whatever is still missing after that is left
    /// out.
    pub async fn tagged_profiles(&self, parent: &NoteId) -> Vec<Profile> {
        let Some(event) = self.cache.get(parent) else {
            debug!("tagged_profiles: {parent} is not cached");
            return Vec::new();
        };

        let mut seen = Vec::new();
        let mut profiles = Vec::new();
        let mut missing = Vec::new();
        for pk in event.tag_values("p").filter_map(|v| Pubkey::from_hex(v).ok()) {
            if seen.contains(&pk) {
                continue;
            }
            seen.push(pk);
            match self.cache.get_profile(&pk) {
                Some(profile) => profiles.push(profile),
                None => missing.push(pk),
            }
        }

        if !missing.is_empty() {
            self.fetch_profiles(&missing).await;
            profiles.extend(missing.iter().filter_map(|pk| self.cache.get_profile(pk)));
        }

        profiles
    }

    /// Events referenced by `e` tags on a cached event, resolved like
    /// `tagged_profiles`
    pub async fn tagged_events(&self, parent: &NoteId) -> Vec<Event> {
        let Some(event) = self.cache.get(parent) else {
            debug!("tagged_events: {parent} is not cached");
            return Vec::new();
        };

        let mut seen = Vec::new();
        let mut events = Vec::new();
        let mut missing = Vec::new();
        for id in event.tag_values("e").filter_map(|v| NoteId::from_hex(v).ok()) {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            match self.cache.get(&id) {
                Some(cached) => events.push(cached),
                None => missing.push(id),
            }
        }

        if !missing.is_empty() {
            self.notes_by_ids(&missing).await;
            events.extend(missing.iter().filter_map(|id| self.cache.get(id)));
        }

        events
    }

    /// Cached profile, else whatever the relays have, else an empty
    /// placeholder
    pub async fn contact_profile(&self, pk: &Pubkey) -> Profile {
        if let Some(profile) = self.cache.get_profile(pk) {
            debug!("contact_profile {pk} (cache)");
            return profile;
        }

        debug!("contact_profile {pk} (query)");
        self.fetch_profiles(&[*pk]).await;
        self.cache
            .get_profile(pk)
            .unwrap_or_else(|| Profile::placeholder(*pk))
    }

    /// Replace any running feed with one live subscription to followed
    /// authors since the last refresh. Returns how many relays carry it.
    pub fn subscribe_feed(self: &Arc<Self>) -> usize {
        self.stop_feed_task();

        let (following, since) = {
            let state = self.lock();
            (state.following.clone(), state.last_refresh)
        };
        if following.is_empty() {
            warn!("subscribe_feed: not following anyone");
            return 0;
        }

        let filter = Filter::new()
            .authors(following)
            .kinds(self.config.feed_kinds.iter().copied())
            .since(since);
        let mut sub = self.pool.subscribe(&filter);
        let relays = sub.relays().len();

        let this: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(delivery) = sub.next().await {
                let Some(this) = this.upgrade() else {
                    break;
                };
                let policy = match delivery.phase {
                    Phase::Backlog => MergePolicy::WithReposts,
                    Phase::Live => MergePolicy::NewOnly,
                };
                this.merge_event(delivery.event, policy);
            }
            debug!("feed subscription ended");
        });

        {
            let mut state = self.lock();
            state.feed = Some(handle);
            state.feed_wanted = true;
        }
        info!("feed subscription open on {relays} relays");
        relays
    }

    fn stop_feed_task(&self) {
        if let Some(feed) = self.lock().feed.take() {
            feed.abort();
        }
        self.pool.unsubscribe_all();
    }

    pub fn unsubscribe_feed(&self) {
        self.lock().feed_wanted = false;
        self.stop_feed_task();
    }

    /// Swap the whole relay set, then reload contacts and the feed. A feed
    /// subscription that was running is reopened on the new relays.
    pub async fn set_relays(self: &Arc<Self>, descriptors: Vec<RelayDescriptor>) -> usize {
        let had_feed = self.is_feed_active();
        self.unsubscribe_feed();
        self.pool.remove_all();

        let connected = self.pool.add_all(descriptors).await;
        info!("relay set replaced, {connected} connected");

        self.refresh_contact_profiles().await;
        self.refresh_feed(MergePolicy::WithReposts).await;
        if had_feed {
            self.subscribe_feed();
        }
        connected
    }

    fn signer(&self) -> Result<&Arc<dyn Signer>> {
        self.identity.signer.as_ref().ok_or(Error::NoSigner)
    }

    fn sign(&self, kind: u64, tags: Vec<Vec<String>>, content: String) -> Result<Event> {
        let signer = self.signer()?;
        let unsigned = UnsignedEvent {
            pubkey: signer.pubkey(),
            created_at: unix_time_secs(),
            kind,
            tags,
            content,
        };
        Ok(signer.sign(unsigned)?)
    }

    fn published(&self, event: Event, report: PublishReport) -> Published {
        self.merge_event(event.clone(), MergePolicy::NewOnly);
        Published { event, report }
    }

    /// Sign and send to every writable relay. Fails unless one accepted.
    pub async fn publish(
        &self,
        kind: u64,
        tags: Vec<Vec<String>>,
        content: impl Into<String>,
    ) -> Result<Published> {
        let event = self.sign(kind, tags, content.into())?;
        let report = self.pool.publish(&event).await.inspect_err(|err| {
            error!("publishing {} failed: {err}", event.id);
        })?;
        Ok(self.published(event, report))
    }

    /// Sign and send to the named relays only
    pub async fn publish_to(
        &self,
        kind: u64,
        tags: Vec<Vec<String>>,
        content: impl Into<String>,
        relays: &[String],
    ) -> Result<Published> {
        let event = self.sign(kind, tags, content.into())?;
        let report = self.pool.publish_to(&event, relays).await.inspect_err(|err| {
            error!("publishing {} failed: {err}", event.id);
        })?;
        Ok(self.published(event, report))
    }

    async fn publish_contacts(&self, following: Vec<Pubkey>) -> Result<Published> {
        let tags = following
            .iter()
            .map(|pk| vec!["p".to_owned(), pk.hex()])
            .collect();
        let published = self.publish(kind::CONTACT_LIST, tags, "").await?;
        self.set_following(following.clone());
        self.notify(Notification::ContactsChanged(following));
        Ok(published)
    }

    /// Publish a contact list with `pks` added
    pub async fn follow(&self, pks: &[Pubkey]) -> Result<Published> {
        self.signer()?;
        let mut following = self.following();
        for pk in pks {
            if !following.contains(pk) {
                following.push(*pk);
            }
        }
        self.publish_contacts(following).await
    }

    /// Publish a contact list with `pk` removed
    pub async fn unfollow(&self, pk: &Pubkey) -> Result<Published> {
        self.signer()?;
        let mut following = self.following();
        following.retain(|f| f != pk);
        self.publish_contacts(following).await
    }

    /// Ask relays to drop one of our events
    pub async fn delete_event(&self, id: &NoteId) -> Result<Published> {
        let tags = vec![vec!["e".to_owned(), id.hex()]];
        self.publish(kind::DELETION, tags, "Deletion request").await
    }

    /// Publish our own metadata and cache the resulting profile
    pub async fn set_metadata(&self, metadata: &ProfileMetadata) -> Result<Published> {
        let content = metadata.to_content()?;
        let published = self.publish(kind::METADATA, vec![], content).await?;

        let following = self.lock().following.contains(&published.event.pubkey);
        match Profile::from_metadata_event(&published.event, following) {
            Ok(profile) => {
                self.cache.put_profile_if_newer(profile);
            }
            Err(err) => warn!("could not cache our own profile: {err}"),
        }
        Ok(published)
    }

    /// Current pool health, also sent out as a notification
    pub fn health_snapshot(&self) -> PoolHealth {
        let health = self.pool.health();
        self.notify(Notification::RelayHealth(health));
        health
    }

    /// One maintenance cycle: poll the feed, report liveness, and on every
    /// `reconnect_after_polls`-th cycle reconnect all relays and reopen the
    /// feed subscription.
    pub async fn maintenance_tick(self: &Arc<Self>, cycle: u64) {
        self.refresh_feed(MergePolicy::NewOnly).await;
        self.notify(Notification::Heartbeat(unix_time_secs()));
        let health = self.health_snapshot();
        debug!("maintenance cycle {cycle}: {health:?}");

        let every = u64::from(self.config.reconnect_after_polls.max(1));
        if cycle % every != 0 {
            return;
        }

        info!("maintenance: reconnecting all relays");
        let had_feed = self.is_feed_active();
        self.pool.reconnect_all().await;
        if had_feed {
            self.subscribe_feed();
        }
    }

    /// Run `maintenance_tick` every `poll_interval_secs` until `shutdown`
    /// or the orchestrator is dropped
    pub fn start_maintenance(self: &Arc<Self>) {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let this = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut cycle: u64 = 0;
            loop {
                tokio::time::sleep(interval).await;
                let Some(this) = this.upgrade() else {
                    break;
                };
                cycle += 1;
                this.maintenance_tick(cycle).await;
            }
        });

        info!("maintenance every {interval:?}");
        if let Some(old) = self.lock().maintenance.replace(handle) {
            old.abort();
        }
    }

    /// Stop background tasks and disconnect every relay
    pub fn shutdown(&self) {
        let (feed, maintenance) = {
            let mut state = self.lock();
            state.feed_wanted = false;
            (state.feed.take(), state.maintenance.take())
        };
        for task in [feed, maintenance].into_iter().flatten() {
            task.abort();
        }

        self.pool.unsubscribe_all();
        self.pool.disconnect_all();
        info!("orchestrator shut down");
    }
}
