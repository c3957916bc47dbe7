use std::ops::ControlFlow;

use ewebsock::{Options, WsEvent, WsMessage, WsSender};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tracing::trace;

use super::capabilities::{self, CapabilitiesError, RelayCapabilities};
use super::identity::NormRelayUrl;
use crate::{Error, Result};

/// Write half of a websocket session
pub trait WsSink: Send {
    fn send(&mut self, msg: WsMessage);
    fn close(&mut self);
}

impl WsSink for WsSender {
    fn send(&mut self, msg: WsMessage) {
        WsSender::send(self, msg)
    }

    fn close(&mut self) {
        WsSender::close(self)
    }
}

/// An open (or opening) websocket session. `events` yields `Opened` first
/// once the handshake completes.
pub struct WsChannel {
    pub sink: Box<dyn WsSink>,
    pub events: mpsc::UnboundedReceiver<WsEvent>,
}

/// How a relay connection reaches the network.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &NormRelayUrl) -> Result<WsChannel>;

    fn fetch_capabilities(
        &self,
        http_url: String,
    ) -> BoxFuture<'static, std::result::Result<RelayCapabilities, CapabilitiesError>>;
}

/// ewebsock for the relay session, hyper for NIP-11
#[derive(Default, Debug, Clone, Copy)]
pub struct WebsocketTransport;

impl Transport for WebsocketTransport {
    fn open(&self, url: &NormRelayUrl) -> Result<WsChannel> {
        let (tx, events) = mpsc::unbounded_channel();
        let relay = url.to_string();
        let on_event = Box::new(move |event: WsEvent| {
            if let WsEvent::Message(WsMessage::Text(ref text)) = event {
                trace!("{relay} -> {text}");
            }
            if tx.send(event).is_err() {
                // nobody is reading this session anymore
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        let sender = ewebsock::ws_connect(url.to_string(), Options::default(), on_event)
            .map_err(Error::Connection)?;

        Ok(WsChannel {
            sink: Box::new(sender),
            events,
        })
    }

    fn fetch_capabilities(
        &self,
        http_url: String,
    ) -> BoxFuture<'static, std::result::Result<RelayCapabilities, CapabilitiesError>> {
        async move { capabilities::fetch(&http_url).await }.boxed()
    }
}
