use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionConfig, RelayConnection};
use super::descriptor::RelayDescriptor;
use super::identity::{NormRelayUrl, RelayReqId};
use super::subscription::{Delivery, Phase};
use super::transport::{Transport, WebsocketTransport};
use super::RelayHealth;
use crate::{Error, Event, Filter, Result};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Per-connection bound on a fanned-out query
    pub query_timeout: Duration,
    /// How long to wait for a relay's `OK` after publishing
    pub publish_timeout: Duration,
    pub connection: ConnectionConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            query_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            connection: ConnectionConfig::default(),
        }
    }
}

/// What a fanned-out query puts on its merged stream
#[derive(Debug)]
pub enum PoolMessage {
    Event(Event),
    /// One connection finished: how many events it contributed, or why it
    /// contributed none.
    Done {
        relay: NormRelayUrl,
        result: Result<usize>,
    },
}

/// Merged results of one `RelayPool::query`.
///
/// Events arrive in whatever order relays answer. The stream ends once
/// every connection it was fanned out to has reported `Done`.
#[derive(Debug)]
pub struct QueryStream {
    pending: usize,
    rx: mpsc::UnboundedReceiver<PoolMessage>,
}

impl QueryStream {
    /// Connections that have not finished yet
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub async fn recv(&mut self) -> Option<PoolMessage> {
        if self.pending == 0 {
            return None;
        }

        let msg = self.rx.recv().await?;
        if let PoolMessage::Done { .. } = msg {
            self.pending -= 1;
        }
        Some(msg)
    }

    /// Next event from any relay, logging completions along the way
    pub async fn next(&mut self) -> Option<Event> {
        while let Some(msg) = self.recv().await {
            match msg {
                PoolMessage::Event(event) => return Some(event),
                PoolMessage::Done { relay, result } => match result {
                    Ok(n) => debug!("{relay} answered with {n} events"),
                    Err(Error::Timeout) => warn!("{relay} timed out"),
                    Err(err) => warn!("{relay} failed: {err}"),
                },
            }
        }
        None
    }

    pub async fn collect(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

/// One logical subscription fanned out over the pool.
///
/// Deliveries from all relays share one stream. For any single relay,
/// every backlog delivery comes before its first live one.
#[derive(Debug)]
pub struct PoolSubscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
    relays: Vec<(NormRelayUrl, RelayReqId)>,
}

impl PoolSubscription {
    /// The relays this subscription is open on, with the per-relay id
    pub fn relays(&self) -> &[(NormRelayUrl, RelayReqId)] {
        &self.relays
    }

    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Route backlog and live deliveries to separate streams. Ordering
    /// between the two streams is lost, use `next` when it matters.
    pub fn into_split(
        self,
    ) -> (
        mpsc::UnboundedReceiver<Delivery>,
        mpsc::UnboundedReceiver<Delivery>,
    ) {
        let (backlog_tx, backlog_rx) = mpsc::unbounded_channel();
        let (live_tx, live_rx) = mpsc::unbounded_channel();
        let mut rx = self.rx;

        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let tx = match delivery.phase {
                    Phase::Backlog => &backlog_tx,
                    Phase::Live => &live_tx,
                };
                let _ = tx.send(delivery);
                if backlog_tx.is_closed() && live_tx.is_closed() {
                    break;
                }
            }
        });

        (backlog_rx, live_rx)
    }
}

/// Aggregate view of the pool, as counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolHealth {
    #[serde(rename = "connectedCount")]
    pub connected: usize,
    #[serde(rename = "readableCount")]
    pub readable: usize,
    #[serde(rename = "writableCount")]
    pub writable: usize,
    #[serde(rename = "activeSubscriptionCount")]
    pub active_subscriptions: usize,
}

/// Which relays took a published event
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub accepted: Vec<NormRelayUrl>,
    /// relay url, reason
    pub rejected: Vec<(String, String)>,
}

impl PublishReport {
    fn summary(&self) -> String {
        if self.rejected.is_empty() {
            return "no relays to publish to".to_owned();
        }
        self.rejected
            .iter()
            .map(|(relay, reason)| format!("{relay}: {reason}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// The configured set of relay connections.
///
/// Fan-out works on a snapshot of the set; a relay added or removed
/// mid-operation is simply not part of that round.
pub struct RelayPool {
    relays: RwLock<Vec<Arc<RelayConnection>>>,
    transport: Arc<dyn Transport>,
    config: PoolConfig,
}

impl Default for RelayPool {
    fn default() -> Self {
        RelayPool::new(Arc::new(WebsocketTransport), PoolConfig::default())
    }
}

impl RelayPool {
    pub fn new(transport: Arc<dyn Transport>, config: PoolConfig) -> Self {
        RelayPool {
            relays: RwLock::new(Vec::new()),
            transport,
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<RelayConnection>>> {
        self.relays.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<RelayConnection>>> {
        self.relays.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Arc<RelayConnection>> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn has(&self, url: &str) -> bool {
        self.get(url).is_some()
    }

    pub fn get(&self, url: &str) -> Option<Arc<RelayConnection>> {
        let url = NormRelayUrl::new(url).ok()?;
        self.read().iter().find(|r| *r.url() == url).cloned()
    }

    pub fn urls(&self) -> BTreeSet<String> {
        self.read().iter().map(|r| r.url().to_string()).collect()
    }

    pub fn writable_urls(&self) -> Vec<String> {
        self.read()
            .iter()
            .filter(|r| r.is_writable())
            .map(|r| r.url().to_string())
            .collect()
    }

    /// Add a relay and connect to it if it is enabled. A relay that fails
    /// to connect stays in the pool, disconnected, for later reconnect
    /// cycles; its error is still returned.
    pub async fn add(&self, descriptor: RelayDescriptor) -> Result<()> {
        let conn = Arc::new(RelayConnection::new(
            descriptor,
            Arc::clone(&self.transport),
            self.config.connection.clone(),
        )?);

        {
            let mut relays = self.write();
            if relays.iter().any(|r| r.url() == conn.url()) {
                debug!("{} is already in the pool", conn.url());
                return Ok(());
            }
            relays.push(Arc::clone(&conn));
        }

        if !conn.descriptor().enabled {
            info!("added {} (disabled)", conn.url());
            return Ok(());
        }

        conn.connect().await
    }

    /// `add` every descriptor concurrently. Failures are logged; returns how
    /// many relays are connected afterwards.
    pub async fn add_all(&self, descriptors: Vec<RelayDescriptor>) -> usize {
        let adds = descriptors.into_iter().map(|descriptor| async move {
            let url = descriptor.url.clone();
            if let Err(err) = self.add(descriptor).await {
                error!("error adding relay {url}: {err}");
            }
        });
        join_all(adds).await;

        self.read().iter().filter(|r| r.is_connected()).count()
    }

    pub fn remove(&self, url: &str) -> bool {
        let Ok(url) = NormRelayUrl::new(url) else {
            return false;
        };

        let removed = {
            let mut relays = self.write();
            let mut removed = Vec::new();
            relays.retain(|r| {
                if *r.url() == url {
                    removed.push(Arc::clone(r));
                    false
                } else {
                    true
                }
            });
            removed
        };

        for conn in &removed {
            conn.disconnect();
        }
        !removed.is_empty()
    }

    /// Fan `filter` out to every readable connection. Returns immediately;
    /// results stream in as each relay answers.
    #[profiling::function]
    pub fn query(&self, filter: &Filter) -> QueryStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pending = 0;

        for conn in self.snapshot().into_iter().filter(|r| r.is_readable()) {
            pending += 1;
            let tx = tx.clone();
            let filter = filter.clone();
            let timeout = self.config.query_timeout;

            tokio::spawn(async move {
                let result = conn
                    .query_with_retry(&filter, timeout)
                    .await
                    .map(|events| {
                        let n = events.len();
                        for event in events {
                            let _ = tx.send(PoolMessage::Event(event));
                        }
                        n
                    });

                let _ = tx.send(PoolMessage::Done {
                    relay: conn.url().clone(),
                    result,
                });
            });
        }

        debug!("query fanned out to {pending} relays");
        QueryStream { pending, rx }
    }

    /// Open `filter` as a long-lived subscription on every readable
    /// connection. Relays that refuse are logged and left out.
    pub fn subscribe(&self, filter: &Filter) -> PoolSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut relays = Vec::new();

        for conn in self.snapshot().into_iter().filter(|r| r.is_readable()) {
            let mut sub = match conn.subscribe(filter.clone()) {
                Ok(sub) => sub,
                Err(err) => {
                    error!("{err}");
                    continue;
                }
            };
            relays.push((conn.url().clone(), sub.id().clone()));

            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(delivery) = sub.next().await {
                    if tx.send(delivery).is_err() {
                        // nobody is listening anymore
                        conn.unsubscribe(sub.id());
                        break;
                    }
                }
                debug!("{} on {} finished", sub.id(), conn.url());
            });
        }

        info!("subscription open on {} relays", relays.len());
        PoolSubscription { rx, relays }
    }

    pub fn unsubscribe_all(&self) {
        for conn in self.snapshot() {
            conn.unsubscribe_all();
        }
    }

    /// Disconnect and reconnect every enabled relay regardless of its
    /// health. This is how disabled relays come back.
    pub async fn reconnect_all(&self) {
        let relays = self.snapshot();
        let reconnects = relays
            .iter()
            .filter(|conn| conn.descriptor().enabled)
            .map(|conn| async move {
                match conn.reconnect().await {
                    Ok(()) => conn.set_health(RelayHealth::Enabled),
                    Err(err) => warn!("reconnect to {} failed: {err}", conn.url()),
                }
            });
        join_all(reconnects).await;
    }

    pub fn disconnect_all(&self) {
        for conn in self.snapshot() {
            conn.disconnect();
        }
    }

    /// `disconnect_all`, then forget every relay
    pub fn remove_all(&self) {
        self.disconnect_all();
        self.write().clear();
    }

    pub fn health(&self) -> PoolHealth {
        let relays = self.snapshot();
        PoolHealth {
            connected: relays.iter().filter(|r| r.is_connected()).count(),
            readable: relays.iter().filter(|r| r.is_readable()).count(),
            writable: relays.iter().filter(|r| r.is_writable()).count(),
            active_subscriptions: relays.iter().map(|r| r.active_subscriptions()).sum(),
        }
    }

    /// Publish to every writable relay. Fails unless at least one accepted.
    pub async fn publish(&self, event: &Event) -> Result<PublishReport> {
        let targets: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|r| r.is_writable())
            .collect();
        self.publish_on(event, targets, PublishReport::default()).await
    }

    /// Publish to the named relays only. Urls not in the pool count as
    /// rejections.
    pub async fn publish_to(&self, event: &Event, urls: &[String]) -> Result<PublishReport> {
        let mut report = PublishReport::default();
        let mut targets = Vec::new();
        for url in urls {
            match self.get(url) {
                Some(conn) => targets.push(conn),
                None => report
                    .rejected
                    .push((url.clone(), "not in the relay pool".to_owned())),
            }
        }
        self.publish_on(event, targets, report).await
    }

    async fn publish_on(
        &self,
        event: &Event,
        targets: Vec<Arc<RelayConnection>>,
        mut report: PublishReport,
    ) -> Result<PublishReport> {
        let timeout = self.config.publish_timeout;
        let results = join_all(targets.iter().map(|conn| async move {
            (conn.url().clone(), conn.publish(event, timeout).await)
        }))
        .await;

        for (relay, result) in results {
            match result {
                Ok(ok) if ok.status => report.accepted.push(relay),
                Ok(ok) => report.rejected.push((relay.to_string(), ok.message)),
                Err(err) => report.rejected.push((relay.to_string(), err.to_string())),
            }
        }

        if report.accepted.is_empty() {
            return Err(Error::PublishRejected(report.summary()));
        }

        info!(
            "published {} to {} relays ({} rejected)",
            event.id,
            report.accepted.len(),
            report.rejected.len()
        );
        Ok(report)
    }
}
