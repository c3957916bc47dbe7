use std::borrow::Cow;

use nostr::{EventBuilder, Keys, Kind, Tag, TagKind, Timestamp};

use crate::{Error, Event, Pubkey, Result};

/// An event ready to be signed
#[derive(Debug, Clone)]
pub struct UnsignedEvent {
    pub pubkey: Pubkey,
    pub created_at: u64,
    pub kind: u64,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// Something that can sign events for the local user
pub trait Signer: Send + Sync {
    fn pubkey(&self) -> Pubkey;
    fn sign(&self, unsigned: UnsignedEvent) -> Result<Event>;
}

/// Signs with an in-memory secret key
#[derive(Clone)]
pub struct KeysSigner {
    keys: Keys,
    pubkey: Pubkey,
}

impl std::fmt::Debug for KeysSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysSigner")
            .field("pubkey", &self.pubkey)
            .finish_non_exhaustive()
    }
}

impl KeysSigner {
    pub fn new(keys: Keys) -> Self {
        let pubkey = Pubkey::new(keys.public_key().to_bytes());
        KeysSigner { keys, pubkey }
    }

    /// hex or `nsec1...`
    pub fn parse(secret: &str) -> Result<Self> {
        let keys = Keys::parse(secret).map_err(|e| Error::Signing(e.to_string()))?;
        Ok(Self::new(keys))
    }

    pub fn generate() -> Self {
        Self::new(Keys::generate())
    }
}

impl Signer for KeysSigner {
    fn pubkey(&self) -> Pubkey {
        self.pubkey
    }

    fn sign(&self, unsigned: UnsignedEvent) -> Result<Event> {
        if unsigned.pubkey != self.pubkey {
            return Err(Error::Signing(format!(
                "cannot sign for {} with the key of {}",
                unsigned.pubkey, self.pubkey
            )));
        }

        let kind = u16::try_from(unsigned.kind)
            .map_err(|_| Error::Signing(format!("kind {} out of range", unsigned.kind)))?;

        let tags = unsigned.tags.into_iter().filter_map(|mut tag| {
            if tag.is_empty() {
                return None;
            }
            let name = tag.remove(0);
            Some(Tag::custom(TagKind::Custom(Cow::Owned(name)), tag))
        });

        let signed = EventBuilder::new(Kind::from(kind), unsigned.content)
            .tags(tags)
            .custom_created_at(Timestamp::from(unsigned.created_at))
            .sign_with_keys(&self.keys)
            .map_err(|e| Error::Signing(e.to_string()))?;

        Event::from_json(&serde_json::to_string(&signed)?)
    }
}
