use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ewebsock::{WsEvent, WsMessage};
use hashbrown::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::capabilities::RelayCapabilities;
use super::descriptor::RelayDescriptor;
use super::identity::{NormRelayUrl, RelayReqId};
use super::message::{CommandResult, RelayMessage};
use super::subscription::{CloseReason, ReqMessage, Subscription};
use super::transport::{Transport, WsChannel, WsSink};
use super::{RelayHealth, RelayStatus};
use crate::{ClientMessage, Error, Event, Filter, Result};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long to wait for the websocket handshake
    pub connect_timeout: Duration,
    /// Pause before the single retry of a failed query
    pub retry_backoff: Duration,
    /// Bound on the NIP-11 fetch done alongside `connect`
    pub capabilities_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(2),
            capabilities_timeout: Duration::from_secs(5),
        }
    }
}

struct Route {
    tx: mpsc::UnboundedSender<ReqMessage>,
    /// a `query`, closed by us right after EOSE
    oneshot: bool,
}

struct ConnectionState {
    status: RelayStatus,
    health: RelayHealth,
    sink: Option<Box<dyn WsSink>>,
    routes: HashMap<RelayReqId, Route>,
    pending_ok: HashMap<String, oneshot::Sender<CommandResult>>,
    capabilities: Option<RelayCapabilities>,
    reader: Option<JoinHandle<()>>,
    /// bumped on every connect/disconnect so a stale reader can't clobber a
    /// newer session
    generation: u64,
}

fn lock(state: &Mutex<ConnectionState>) -> MutexGuard<'_, ConnectionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One persistent session with one relay.
///
/// All bookkeeping sits behind a std mutex that is never held across an
/// await. A reader task owns the inbound half of the websocket and routes
/// relay frames to the `query`/`subscribe` call that opened the matching
/// `REQ`.
pub struct RelayConnection {
    url: NormRelayUrl,
    descriptor: RelayDescriptor,
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    state: Arc<Mutex<ConnectionState>>,
    /// held while a failed query re-establishes the session, so concurrent
    /// retries share one reconnect
    reconnect: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("RelayConnection")
            .field("url", &self.url)
            .field("status", &state.status)
            .field("health", &state.health)
            .field("routes", &state.routes.len())
            .finish()
    }
}

impl RelayConnection {
    pub fn new(
        descriptor: RelayDescriptor,
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let url = NormRelayUrl::new(&descriptor.url)?;
        Ok(RelayConnection {
            url,
            descriptor,
            transport,
            config,
            state: Arc::new(Mutex::new(ConnectionState {
                status: RelayStatus::Disconnected,
                health: RelayHealth::Enabled,
                sink: None,
                routes: HashMap::new(),
                pending_ok: HashMap::new(),
                capabilities: None,
                reader: None,
                generation: 0,
            })),
            reconnect: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        lock(&self.state)
    }

    pub fn url(&self) -> &NormRelayUrl {
        &self.url
    }

    pub fn descriptor(&self) -> &RelayDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> RelayStatus {
        self.lock().status
    }

    pub fn health(&self) -> RelayHealth {
        self.lock().health
    }

    pub(crate) fn set_health(&self, health: RelayHealth) {
        let mut state = self.lock();
        if state.health != health {
            info!("{}: {:?} -> {:?}", self.url, state.health, health);
            state.health = health;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status() == RelayStatus::Connected
    }

    /// Eligible for query and subscription fan-out
    pub fn is_readable(&self) -> bool {
        self.descriptor.enabled && self.descriptor.read && self.health() != RelayHealth::Disabled
    }

    /// Eligible for publishing
    pub fn is_writable(&self) -> bool {
        self.descriptor.enabled && self.descriptor.write && self.health() != RelayHealth::Disabled
    }

    /// Long-lived subscriptions currently open, queries excluded
    pub fn active_subscriptions(&self) -> usize {
        self.lock().routes.values().filter(|r| !r.oneshot).count()
    }

    /// Last NIP-11 document fetched for this relay, if any
    pub fn capabilities(&self) -> Option<RelayCapabilities> {
        self.lock().capabilities.clone()
    }

    /// Open the websocket session. The NIP-11 document is fetched in the
    /// background and never holds up the handshake.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.lock();
            if matches!(
                state.status,
                RelayStatus::Connected | RelayStatus::Connecting
            ) {
                return Err(Error::AlreadyConnected);
            }
            state.status = RelayStatus::Connecting;
        }

        self.spawn_capabilities_refresh();

        info!("connecting to {}", self.url);
        let WsChannel {
            mut sink,
            mut events,
        } = match self.transport.open(&self.url) {
            Ok(channel) => channel,
            Err(err) => return Err(self.connect_failed(err)),
        };

        let opened =
            match tokio::time::timeout(self.config.connect_timeout, wait_for_open(&mut events))
                .await
            {
                Ok(res) => res,
                Err(_) => Err(Error::Connection(format!(
                    "handshake timed out after {:?}",
                    self.config.connect_timeout
                ))),
            };

        if let Err(err) = opened {
            sink.close();
            return Err(self.connect_failed(err));
        }

        let mut state = self.lock();
        state.generation += 1;
        let generation = state.generation;
        state.status = RelayStatus::Connected;
        let reader = tokio::spawn(read_loop(
            self.url.clone(),
            Arc::clone(&self.state),
            events,
            generation,
        ));
        if let Some(mut stale) = state.sink.replace(sink) {
            stale.close();
        }
        if let Some(stale) = state.reader.replace(reader) {
            stale.abort();
        }
        info!("connected to {}", self.url);

        Ok(())
    }

    fn connect_failed(&self, err: Error) -> Error {
        error!("could not connect to {}: {err}", self.url);
        self.lock().status = RelayStatus::Disconnected;
        err
    }

    /// Close every subscription, then the transport. Close errors are the
    /// transport's business and are not reported.
    pub fn disconnect(&self) {
        let (sink, reader, routes) = {
            let mut state = self.lock();
            state.generation += 1;
            state.status = RelayStatus::Disconnected;
            state.pending_ok.clear();
            (
                state.sink.take(),
                state.reader.take(),
                std::mem::take(&mut state.routes),
            )
        };

        if let Some(mut sink) = sink {
            for id in routes.keys() {
                match ClientMessage::close(id.to_string()).to_json() {
                    Ok(json) => sink.send(WsMessage::Text(json)),
                    Err(err) => warn!("could not encode CLOSE for {id}: {err}"),
                }
            }
            sink.close();
        }

        // dropping the routes ends every subscription stream
        drop(routes);

        if let Some(reader) = reader {
            reader.abort();
        }

        debug!("disconnected from {}", self.url);
    }

    fn spawn_capabilities_refresh(&self) {
        let url = self.url.clone();
        let fetch = fetch_capabilities(
            Arc::clone(&self.transport),
            Arc::clone(&self.state),
            self.url.clone(),
            self.config.capabilities_timeout,
        );
        tokio::spawn(async move {
            if let Err(err) = fetch.await {
                warn!("could not fetch capabilities for {url}: {err}");
            }
        });
    }

    /// Fetch the NIP-11 document now and store it
    pub async fn refresh_capabilities(&self) -> Result<RelayCapabilities> {
        fetch_capabilities(
            Arc::clone(&self.transport),
            Arc::clone(&self.state),
            self.url.clone(),
            self.config.capabilities_timeout,
        )
        .await
    }

    fn send(&self, state: &mut ConnectionState, msg: &ClientMessage) -> Result<()> {
        let json = msg.to_json()?;
        let Some(sink) = state.sink.as_mut() else {
            return Err(Error::NotConnected);
        };
        debug!("sending {} to {}", json, self.url);
        sink.send(WsMessage::Text(json));
        Ok(())
    }

    fn open_req(
        &self,
        filter: &Filter,
        oneshot: bool,
    ) -> Result<(RelayReqId, mpsc::UnboundedReceiver<ReqMessage>)> {
        let id = RelayReqId::default();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.lock();
        let req = ClientMessage::req(id.to_string(), vec![filter.clone()]);
        self.send(&mut state, &req)?;
        state.routes.insert(id.clone(), Route { tx, oneshot });

        if let Some(caps) = &state.capabilities {
            let open = state.routes.len();
            if open > caps.max_subscriptions() {
                warn!(
                    "{} advertises max_subscriptions={} but has {} open",
                    self.url,
                    caps.max_subscriptions(),
                    open
                );
            }
        }

        Ok((id, rx))
    }

    /// One-shot request: everything stored that matches `filter`, up to
    /// the relay's end-of-stored-events. Events seen before a timeout are
    /// thrown away.
    pub async fn query(&self, filter: &Filter, timeout: Duration) -> Result<Vec<Event>> {
        let (id, mut rx) = self.open_req(filter, true)?;

        let result = tokio::time::timeout(timeout, collect_backlog(&mut rx)).await;
        self.unsubscribe(&id);

        match result {
            Ok(events) => events,
            Err(_) => {
                debug!("query {} on {} timed out after {:?}", id, self.url, timeout);
                Err(Error::Timeout)
            }
        }
    }

    /// `query`, retried once after `retry_backoff` when the first attempt
    /// fails for a reason other than a timeout. A session that is still up
    /// only gets the `REQ` again; a lost one is reconnected first, once for
    /// all queries waiting on it. A failed retry disables this connection
    /// until the next reconnect cycle.
    pub async fn query_with_retry(&self, filter: &Filter, timeout: Duration) -> Result<Vec<Event>> {
        match self.query(filter, timeout).await {
            Ok(events) => return Ok(events),
            Err(Error::Timeout) => return Err(Error::Timeout),
            Err(err) => warn!("query on {} failed: {err}, retrying", self.url),
        }

        self.set_health(RelayHealth::Retrying);
        tokio::time::sleep(self.config.retry_backoff).await;

        let retried = match self.ensure_connected().await {
            Ok(()) => self.query(filter, timeout).await,
            Err(err) => Err(err),
        };

        match retried {
            Ok(events) => {
                self.set_health(RelayHealth::Enabled);
                Ok(events)
            }
            Err(err) => {
                error!("retry on {} failed: {err}, disabling relay", self.url);
                self.set_health(RelayHealth::Disabled);
                Err(err)
            }
        }
    }

    /// Drop the session and open a fresh one. Waits out any retry that is
    /// re-establishing the session right now.
    pub async fn reconnect(&self) -> Result<()> {
        let _reconnecting = self.reconnect.lock().await;
        self.disconnect();
        self.connect().await
    }

    /// Reconnect unless the session is up. Whoever gets here second finds
    /// the first one's session and leaves it alone.
    async fn ensure_connected(&self) -> Result<()> {
        let _reconnecting = self.reconnect.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        debug!("{}: re-establishing session for retry", self.url);
        self.connect().await
    }

    /// Open a long-lived `REQ`. Events arrive on the returned handle, tagged
    /// backlog until the relay's `EOSE` and live after.
    pub fn subscribe(&self, filter: Filter) -> Result<Subscription> {
        let (id, rx) = self
            .open_req(&filter, false)
            .map_err(|err| Error::Subscribe(format!("{}: {err}", self.url)))?;
        debug!("subscription {} opened on {}", id, self.url);
        Ok(Subscription::new(id, self.url.clone(), filter, rx))
    }

    /// Forget `id` and tell the relay to stop. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: &RelayReqId) {
        let mut state = self.lock();
        if state.routes.remove(id).is_none() {
            return;
        }
        if let Err(err) = self.send(&mut state, &ClientMessage::close(id.to_string())) {
            trace!("CLOSE {} on {} not sent: {err}", id, self.url);
        }
    }

    pub fn unsubscribe_all(&self) {
        let ids: Vec<RelayReqId> = {
            let state = self.lock();
            state
                .routes
                .iter()
                .filter(|(_, route)| !route.oneshot)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in &ids {
            self.unsubscribe(id);
        }
    }

    /// Send `event` and wait for the relay's `OK`
    pub async fn publish(&self, event: &Event, timeout: Duration) -> Result<CommandResult> {
        let key = event.id.hex();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock();
            self.send(&mut state, &ClientMessage::event(event))?;
            state.pending_ok.insert(key.clone(), tx);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(Error::Connection(format!(
                "{} went away before answering",
                self.url
            ))),
            Err(_) => {
                self.lock().pending_ok.remove(&key);
                Err(Error::Timeout)
            }
        }
    }
}

async fn collect_backlog(rx: &mut mpsc::UnboundedReceiver<ReqMessage>) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    while let Some(msg) = rx.recv().await {
        match msg {
            ReqMessage::Event(event) => events.push(event),
            ReqMessage::EndOfBacklog => return Ok(events),
            ReqMessage::Closed(reason) => return Err(Error::Query(reason.to_string())),
        }
    }
    Err(Error::Query(CloseReason::Unsubscribed.to_string()))
}

async fn wait_for_open(events: &mut mpsc::UnboundedReceiver<WsEvent>) -> Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            WsEvent::Opened => return Ok(()),
            WsEvent::Error(err) => return Err(Error::Connection(err)),
            WsEvent::Closed => {
                return Err(Error::Connection("closed during handshake".to_owned()))
            }
            WsEvent::Message(_) => {}
        }
    }
    Err(Error::Connection("transport went away".to_owned()))
}

async fn fetch_capabilities(
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<ConnectionState>>,
    url: NormRelayUrl,
    timeout: Duration,
) -> Result<RelayCapabilities> {
    let caps = match tokio::time::timeout(timeout, transport.fetch_capabilities(url.http_url()))
        .await
    {
        Ok(res) => res?,
        Err(_) => return Err(Error::Timeout),
    };

    debug!(
        "NIP-11 for {}: max_subscriptions={}",
        url,
        caps.max_subscriptions()
    );
    lock(&state).capabilities = Some(caps.clone());
    Ok(caps)
}

async fn read_loop(
    url: NormRelayUrl,
    state: Arc<Mutex<ConnectionState>>,
    mut events: mpsc::UnboundedReceiver<WsEvent>,
    generation: u64,
) {
    while let Some(event) = events.recv().await {
        match event {
            WsEvent::Message(WsMessage::Text(text)) => match RelayMessage::from_json(&text) {
                Ok(msg) => dispatch(&url, &state, msg),
                Err(err) => warn!("{url}: could not handle relay message: {err}"),
            },
            WsEvent::Message(WsMessage::Ping(bytes)) => {
                if let Some(sink) = lock(&state).sink.as_mut() {
                    sink.send(WsMessage::Pong(bytes));
                }
            }
            WsEvent::Message(_) | WsEvent::Opened => {}
            WsEvent::Error(err) => {
                error!("{url}: {err}");
                break;
            }
            WsEvent::Closed => {
                debug!("{url}: closed by peer");
                break;
            }
        }
    }

    transport_ended(&url, &state, generation);
}

fn dispatch(url: &NormRelayUrl, state: &Mutex<ConnectionState>, msg: RelayMessage) {
    let mut state = lock(state);
    match msg {
        RelayMessage::Event { sub_id, mut event } => {
            let Some(route) = state.routes.get(sub_id.as_str()) else {
                trace!("{url}: event for unknown subscription {sub_id}");
                return;
            };
            event.extra.add_relay(url.as_str());
            if route.tx.send(ReqMessage::Event(event)).is_err() {
                state.routes.remove(sub_id.as_str());
            }
        }
        RelayMessage::Eose(sub_id) => {
            if let Some(route) = state.routes.get(sub_id.as_str()) {
                let _ = route.tx.send(ReqMessage::EndOfBacklog);
            }
        }
        RelayMessage::OK(result) => {
            if let Some(tx) = state.pending_ok.remove(&result.event_id) {
                let _ = tx.send(result);
            }
        }
        RelayMessage::Notice(notice) => info!("NOTICE from {url}: {notice}"),
        RelayMessage::Closed { sub_id, message } => {
            if let Some(route) = state.routes.remove(sub_id.as_str()) {
                warn!("{url} closed {sub_id}: {message}");
                let _ = route
                    .tx
                    .send(ReqMessage::Closed(CloseReason::RelayClosed(message)));
            }
        }
    }
}

/// The websocket is gone. Every open `REQ` ends; a connection that was
/// carrying live subscriptions is disabled until a reconnect cycle.
fn transport_ended(url: &NormRelayUrl, state: &Mutex<ConnectionState>, generation: u64) {
    let mut state = lock(state);
    if state.generation != generation {
        return;
    }

    state.status = RelayStatus::Failed;
    state.sink = None;
    state.reader = None;
    state.pending_ok.clear();

    let mut had_subscriptions = false;
    for (_, route) in state.routes.drain() {
        had_subscriptions |= !route.oneshot;
        let _ = route
            .tx
            .send(ReqMessage::Closed(CloseReason::TransportEnded));
    }

    if had_subscriptions && state.health != RelayHealth::Disabled {
        warn!("{url}: transport ended under live subscriptions, disabling relay");
        state.health = RelayHealth::Disabled;
    } else {
        info!("{url}: transport ended");
    }
}
