use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{self, BoxFuture, FutureExt};
use nrelay::ewebsock::{WsEvent, WsMessage};
use nrelay::{
    CapabilitiesError, Error, Event, Filter, NormRelayUrl, RelayCapabilities, RelayDescriptor,
    Transport, WsChannel, WsSink,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

/// How a mock relay answers a `REQ`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqBehavior {
    /// Stored matches, newest first and capped by `limit`, then `EOSE`
    Answer,
    /// Stored matches but never `EOSE`
    Stall,
    /// Nothing at all
    Silent,
    /// `CLOSED` right away
    Refuse,
}

#[derive(Debug, Clone)]
pub enum CapabilitiesBehavior {
    /// Serve this NIP-11 JSON
    Document(String),
    Fail,
    /// Never answer
    Hang,
}

struct Session {
    tx: mpsc::UnboundedSender<WsEvent>,
    subs: Vec<(String, Filter)>,
    open: bool,
}

impl Session {
    fn send(&self, frame: Value) {
        if self.open {
            let _ = self
                .tx
                .send(WsEvent::Message(WsMessage::Text(frame.to_string())));
        }
    }
}

struct MockRelayState {
    url: NormRelayUrl,
    stored: Vec<Event>,
    req_behavior: ReqBehavior,
    drops_left: usize,
    refusals_left: usize,
    refuse_connect: bool,
    accept_publish: bool,
    capabilities: CapabilitiesBehavior,
    sessions: Vec<Session>,
    reqs: Vec<Filter>,
    closes: Vec<String>,
    published: Vec<Event>,
    connects: usize,
}

/// A scripted relay. Clones share state, so a test keeps one handle while
/// the transport holds another.
#[derive(Clone)]
pub struct MockRelay {
    state: Arc<Mutex<MockRelayState>>,
}

impl MockRelay {
    fn new(url: NormRelayUrl) -> Self {
        MockRelay {
            state: Arc::new(Mutex::new(MockRelayState {
                url,
                stored: Vec::new(),
                req_behavior: ReqBehavior::Answer,
                drops_left: 0,
                refusals_left: 0,
                refuse_connect: false,
                accept_publish: true,
                capabilities: CapabilitiesBehavior::Fail,
                sessions: Vec::new(),
                reqs: Vec::new(),
                closes: Vec::new(),
                published: Vec::new(),
                connects: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockRelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn url(&self) -> NormRelayUrl {
        self.lock().url.clone()
    }

    pub fn descriptor(&self) -> RelayDescriptor {
        RelayDescriptor::read_write(self.url().to_string())
    }

    pub fn store(&self, event: Event) {
        self.lock().stored.push(event);
    }

    pub fn with_events(self, events: impl IntoIterator<Item = Event>) -> Self {
        self.lock().stored.extend(events);
        self
    }

    pub fn set_behavior(&self, behavior: ReqBehavior) {
        self.lock().req_behavior = behavior;
    }

    /// Drop the websocket when each of the next `n` `REQ`s arrives
    pub fn drop_next_reqs(&self, n: usize) {
        self.lock().drops_left = n;
    }

    /// Answer each of the next `n` `REQ`s with `CLOSED`, keeping the session
    pub fn refuse_next_reqs(&self, n: usize) {
        self.lock().refusals_left = n;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connect = refuse;
    }

    pub fn accept_publishes(&self, accept: bool) {
        self.lock().accept_publish = accept;
    }

    pub fn set_capabilities(&self, caps: CapabilitiesBehavior) {
        self.lock().capabilities = caps;
    }

    /// Store `event` and stream it to every open subscription it matches
    pub fn push_live(&self, event: Event) {
        let mut state = self.lock();
        for session in state.sessions.iter().filter(|s| s.open) {
            for (sub_id, filter) in &session.subs {
                if filter.matches(&event) {
                    session.send(json!(["EVENT", sub_id, event]));
                }
            }
        }
        state.stored.push(event);
    }

    /// Kill every open websocket from the relay side
    pub fn drop_connections(&self) {
        let mut state = self.lock();
        for session in state.sessions.iter_mut().filter(|s| s.open) {
            session.open = false;
            let _ = session.tx.send(WsEvent::Closed);
        }
    }

    pub fn reqs(&self) -> Vec<Filter> {
        self.lock().reqs.clone()
    }

    pub fn req_count(&self) -> usize {
        self.lock().reqs.len()
    }

    pub fn closes(&self) -> Vec<String> {
        self.lock().closes.clone()
    }

    pub fn published(&self) -> Vec<Event> {
        self.lock().published.clone()
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Subscriptions the relay still considers open, over all sessions
    pub fn open_subscriptions(&self) -> usize {
        self.lock()
            .sessions
            .iter()
            .filter(|s| s.open)
            .map(|s| s.subs.len())
            .sum()
    }

    fn open(&self) -> WsChannel {
        let (tx, events) = mpsc::unbounded_channel();
        let mut state = self.lock();

        if state.refuse_connect {
            let _ = tx.send(WsEvent::Error("connection refused".to_owned()));
            return WsChannel {
                sink: Box::new(NullSink),
                events,
            };
        }

        state.connects += 1;
        let _ = tx.send(WsEvent::Opened);
        state.sessions.push(Session {
            tx,
            subs: Vec::new(),
            open: true,
        });
        let session = state.sessions.len() - 1;

        WsChannel {
            sink: Box::new(MockSink {
                relay: self.clone(),
                session,
            }),
            events,
        }
    }

    fn handle(&self, session_idx: usize, text: &str) {
        let Ok(Value::Array(frame)) = serde_json::from_str::<Value>(text) else {
            return;
        };
        let mut state = self.lock();
        let state = &mut *state;
        let session = &mut state.sessions[session_idx];
        if !session.open {
            return;
        }

        match frame.first().and_then(Value::as_str) {
            Some("REQ") => {
                let sub_id = frame[1].as_str().unwrap_or_default().to_owned();
                let filter: Filter =
                    serde_json::from_value(frame.get(2).cloned().unwrap_or(Value::Null))
                        .unwrap_or_default();
                state.reqs.push(filter.clone());

                if state.drops_left > 0 {
                    state.drops_left -= 1;
                    session.open = false;
                    let _ = session.tx.send(WsEvent::Closed);
                    return;
                }

                if state.refusals_left > 0 {
                    state.refusals_left -= 1;
                    session.send(json!(["CLOSED", sub_id, "error: too many subscriptions"]));
                    return;
                }

                let behavior = state.req_behavior;
                if matches!(behavior, ReqBehavior::Answer | ReqBehavior::Stall) {
                    let mut matches: Vec<&Event> =
                        state.stored.iter().filter(|e| filter.matches(e)).collect();
                    matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                    if let Some(limit) = filter.limit {
                        matches.truncate(limit);
                    }
                    for event in matches {
                        session.send(json!(["EVENT", sub_id, event]));
                    }
                }

                match behavior {
                    ReqBehavior::Answer => session.send(json!(["EOSE", sub_id])),
                    ReqBehavior::Refuse => {
                        session.send(json!(["CLOSED", sub_id, "blocked: not today"]));
                        return;
                    }
                    ReqBehavior::Stall | ReqBehavior::Silent => {}
                }
                session.subs.push((sub_id, filter));
            }
            Some("CLOSE") => {
                let sub_id = frame[1].as_str().unwrap_or_default();
                session.subs.retain(|(id, _)| id != sub_id);
                state.closes.push(sub_id.to_owned());
            }
            Some("EVENT") => {
                let Some(Ok(event)) = frame
                    .get(1)
                    .cloned()
                    .map(serde_json::from_value::<Event>)
                else {
                    return;
                };
                let accepted = state.accept_publish;
                let message = if accepted { "" } else { "blocked: read-only relay" };
                session.send(json!(["OK", event.id.hex(), accepted, message]));
                state.published.push(event);
            }
            other => debug!("mock relay ignoring {other:?}"),
        }
    }

    fn close_session(&self, session_idx: usize) {
        if let Some(session) = self.lock().sessions.get_mut(session_idx) {
            session.open = false;
        }
    }
}

struct MockSink {
    relay: MockRelay,
    session: usize,
}

impl WsSink for MockSink {
    fn send(&mut self, msg: WsMessage) {
        if let WsMessage::Text(text) = msg {
            self.relay.handle(self.session, &text);
        }
    }

    fn close(&mut self) {
        self.relay.close_session(self.session);
    }
}

struct NullSink;

impl WsSink for NullSink {
    fn send(&mut self, _msg: WsMessage) {}
    fn close(&mut self) {}
}

/// Routes connections to registered [`MockRelay`]s; unknown urls fail to
/// connect.
#[derive(Clone, Default)]
pub struct MockTransport {
    relays: Arc<Mutex<Vec<MockRelay>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn relays(&self) -> MutexGuard<'_, Vec<MockRelay>> {
        self.relays.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a relay at `url` and return a handle to script it
    pub fn relay(&self, url: &str) -> MockRelay {
        let url = NormRelayUrl::new(url).expect("mock relay url");
        let relay = MockRelay::new(url);
        self.relays().push(relay.clone());
        relay
    }

    fn find(&self, pred: impl Fn(&NormRelayUrl) -> bool) -> Option<MockRelay> {
        self.relays().iter().find(|r| pred(&r.url())).cloned()
    }
}

impl Transport for MockTransport {
    fn open(&self, url: &NormRelayUrl) -> nrelay::Result<WsChannel> {
        match self.find(|u| u == url) {
            Some(relay) => Ok(relay.open()),
            None => Err(Error::Connection(format!("no route to {url}"))),
        }
    }

    fn fetch_capabilities(
        &self,
        http_url: String,
    ) -> BoxFuture<'static, Result<RelayCapabilities, CapabilitiesError>> {
        let behavior = self
            .find(|u| u.http_url() == http_url)
            .map(|r| r.lock().capabilities.clone())
            .unwrap_or(CapabilitiesBehavior::Fail);

        match behavior {
            CapabilitiesBehavior::Document(doc) => {
                future::ready(RelayCapabilities::from_json(doc.as_bytes())).boxed()
            }
            CapabilitiesBehavior::Fail => {
                future::ready(Err(CapabilitiesError::HttpStatus(404))).boxed()
            }
            CapabilitiesBehavior::Hang => future::pending().boxed(),
        }
    }
}
