use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use super::identity::{NormRelayUrl, RelayReqId};
use crate::{Event, Filter};

/// Which part of a subscription's stream an event came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Stored events replayed before the relay's `EOSE`
    Backlog,
    /// Events the relay forwarded after `EOSE`
    Live,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    EndOfBacklog,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    Unsubscribed,
    /// The relay sent `CLOSED`
    RelayClosed(String),
    TransportEnded,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Unsubscribed => write!(f, "unsubscribed"),
            CloseReason::RelayClosed(msg) => write!(f, "closed by relay: {msg}"),
            CloseReason::TransportEnded => write!(f, "transport ended"),
        }
    }
}

/// What a connection's reader forwards to whoever owns a `REQ`
#[derive(Debug)]
pub(crate) enum ReqMessage {
    Event(Event),
    EndOfBacklog,
    Closed(CloseReason),
}

/// One event off a subscription, tagged with where and when it came from
#[derive(Debug, Clone)]
pub struct Delivery {
    pub relay: NormRelayUrl,
    pub phase: Phase,
    pub event: Event,
}

/// A long-lived `REQ` on one relay.
///
/// Dropping the handle does not close the relay-side subscription, use
/// `RelayConnection::unsubscribe` for that.
pub struct Subscription {
    id: RelayReqId,
    relay: NormRelayUrl,
    filter: Filter,
    state: SubscriptionState,
    close_reason: Option<CloseReason>,
    rx: mpsc::UnboundedReceiver<ReqMessage>,
}

impl Subscription {
    pub(crate) fn new(
        id: RelayReqId,
        relay: NormRelayUrl,
        filter: Filter,
        rx: mpsc::UnboundedReceiver<ReqMessage>,
    ) -> Self {
        Subscription {
            id,
            relay,
            filter,
            state: SubscriptionState::Active,
            close_reason: None,
            rx,
        }
    }

    pub fn id(&self) -> &RelayReqId {
        &self.id
    }

    pub fn relay(&self) -> &NormRelayUrl {
        &self.relay
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// The phase the next event will be tagged with
    pub fn phase(&self) -> Phase {
        match self.state {
            SubscriptionState::Active => Phase::Backlog,
            SubscriptionState::EndOfBacklog | SubscriptionState::Closed => Phase::Live,
        }
    }

    /// Wait for the next event. `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            if self.state == SubscriptionState::Closed {
                return None;
            }

            match self.rx.recv().await {
                Some(ReqMessage::Event(event)) => {
                    return Some(Delivery {
                        relay: self.relay.clone(),
                        phase: self.phase(),
                        event,
                    });
                }
                Some(ReqMessage::EndOfBacklog) => {
                    if self.state == SubscriptionState::Active {
                        debug!("{} on {}: end of backlog", self.id, self.relay);
                        self.state = SubscriptionState::EndOfBacklog;
                    }
                }
                Some(ReqMessage::Closed(reason)) => self.close(reason),
                None => self.close(CloseReason::Unsubscribed),
            }
        }
    }

    fn close(&mut self, reason: CloseReason) {
        debug!("{} on {} closed: {}", self.id, self.relay, reason);
        self.state = SubscriptionState::Closed;
        self.close_reason = Some(reason);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("relay", &self.relay)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NoteId, Pubkey};

    fn note(n: u8) -> Event {
        Event {
            id: NoteId::new([n; 32]),
            pubkey: Pubkey::new([1; 32]),
            created_at: n as u64,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn phases_follow_end_of_backlog() {
        let (tx, rx) = mpsc::unbounded_channel();
        let url = NormRelayUrl::new("wss://relay.test").unwrap();
        let mut sub = Subscription::new(RelayReqId::default(), url, Filter::new(), rx);

        tx.send(ReqMessage::Event(note(1))).unwrap();
        tx.send(ReqMessage::Event(note(2))).unwrap();
        tx.send(ReqMessage::EndOfBacklog).unwrap();
        tx.send(ReqMessage::Event(note(3))).unwrap();
        tx.send(ReqMessage::Closed(CloseReason::RelayClosed("bye".into())))
            .unwrap();
        tx.send(ReqMessage::Event(note(4))).unwrap();

        let mut seen = vec![];
        while let Some(delivery) = sub.next().await {
            seen.push((delivery.event.created_at, delivery.phase));
        }

        assert_eq!(
            seen,
            vec![(1, Phase::Backlog), (2, Phase::Backlog), (3, Phase::Live)]
        );
        assert_eq!(sub.state(), SubscriptionState::Closed);
        assert_eq!(
            sub.close_reason(),
            Some(&CloseReason::RelayClosed("bye".into()))
        );
    }

    #[tokio::test]
    async fn dropped_sender_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let url = NormRelayUrl::new("wss://relay.test").unwrap();
        let mut sub = Subscription::new(RelayReqId::default(), url, Filter::new(), rx);
        drop(tx);
        assert!(sub.next().await.is_none());
        assert_eq!(sub.close_reason(), Some(&CloseReason::Unsubscribed));
    }
}
