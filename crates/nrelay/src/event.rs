use crate::{Error, Pubkey};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Well-known event kinds
pub mod kind {
    pub const METADATA: u64 = 0;
    pub const TEXT_NOTE: u64 = 1;
    pub const CONTACT_LIST: u64 = 3;
    pub const DELETION: u64 = 5;
    pub const REPOST: u64 = 6;
}

#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NoteId([u8; 32]);

impl fmt::Debug for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

static HRP_NOTE: bech32::Hrp = bech32::Hrp::parse_unchecked("note");

impl NoteId {
    pub fn new(bytes: [u8; 32]) -> Self {
        NoteId(bytes)
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn hex(&self) -> String {
        hex::encode(self.bytes())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, Error> {
        Ok(NoteId(hex::decode(hex_str)?.as_slice().try_into()?))
    }

    pub fn to_bech(&self) -> Option<String> {
        bech32::encode::<bech32::Bech32>(HRP_NOTE, &self.0).ok()
    }
}

/// Annotations a client derives about an event after receiving it. These are
/// never sent over the wire and never affect the event's identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventExtra {
    relays: Vec<String>,
    values: BTreeMap<String, String>,
}

impl EventExtra {
    /// Record a relay this event was seen on. The first relay stays first.
    pub fn add_relay(&mut self, relay: &str) {
        if !self.relays.iter().any(|r| r == relay) {
            self.relays.push(relay.to_owned());
        }
    }

    /// The relay this event was first seen on
    pub fn relay(&self) -> Option<&str> {
        self.relays.first().map(String::as_str)
    }

    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_owned(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Fold in annotations from another observation of the same event.
    /// Relays accumulate, newer values replace older ones.
    pub fn merge(&mut self, other: &EventExtra) {
        for relay in &other.relays {
            self.add_relay(relay);
        }
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }
}

/// A signed nostr event as seen on the wire, plus local annotations
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Event {
    /// 32-bytes sha256 of the the serialized event data
    pub id: NoteId,
    /// 32-bytes hex-encoded public key of the event creator
    pub pubkey: Pubkey,
    /// unix timestamp in seconds
    pub created_at: u64,
    pub kind: u64,
    pub tags: Vec<Vec<String>>,
    /// arbitrary string
    pub content: String,
    /// 64-bytes signature of the sha256 hash of the serialized event data
    pub sig: String,
    #[serde(skip)]
    pub extra: EventExtra,
}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.0.hash(state);
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl Event {
    pub fn from_json(s: &str) -> Result<Self, Error> {
        serde_json::from_str(s).map_err(Into::into)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(Into::into)
    }

    /// The first value of every tag named `key`, e.g. the pubkeys of all
    /// `p` tags.
    pub fn tag_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags.iter().filter_map(move |tag| match tag.as_slice() {
            [name, value, ..] if name == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Another observation of this same event carries nothing new but
    /// annotations.
    pub fn merge_extra(&mut self, other: &Event) {
        debug_assert_eq!(self.id, other.id);
        self.extra.merge(&other.extra);
    }
}

impl std::str::FromStr for Event {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Event::from_json(s)
    }
}

impl Serialize for NoteId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for NoteId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NoteId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
