use nrelay::{Event, PoolHealth, Pubkey};
use tokio::sync::mpsc;

use crate::profile::Profile;

/// Domain events for whatever presents the feed
#[derive(Debug, Clone)]
pub enum Notification {
    /// First sighting of an event
    NewEvent(Event),
    /// An already cached event seen again where the caller wants a refresh
    RefreshedEvent(Event),
    /// Metadata for a followed account changed
    ProfileUpdated(Profile),
    /// We published a new contact list; this is who we follow now
    ContactsChanged(Vec<Pubkey>),
    RelayHealth(PoolHealth),
    /// Unix time of a maintenance tick
    Heartbeat(u64),
}

impl Notification {
    /// Stable name, for logging or bridging to a string-keyed event bus
    pub fn name(&self) -> &'static str {
        match self {
            Notification::NewEvent(_) => "new-event",
            Notification::RefreshedEvent(_) => "refreshed-event",
            Notification::ProfileUpdated(_) => "profile-updated",
            Notification::ContactsChanged(_) => "contacts-changed",
            Notification::RelayHealth(_) => "relay-health",
            Notification::Heartbeat(_) => "heartbeat",
        }
    }
}

pub type NotificationSender = mpsc::UnboundedSender<Notification>;
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

pub fn channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::unbounded_channel()
}
