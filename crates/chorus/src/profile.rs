use nrelay::{kind, Event, Pubkey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Decoded content of a kind 0 metadata event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud06: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

fn get_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_owned)
}

impl ProfileMetadata {
    /// Parse metadata event content. Fields of the wrong type are ignored;
    /// content that is not a JSON object is a decode error.
    pub fn from_content(content: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(content).map_err(|e| Error::Decode(e.to_string()))?;
        let Value::Object(obj) = value else {
            return Err(Error::Decode("metadata is not a JSON object".to_owned()));
        };

        Ok(ProfileMetadata {
            name: get_str(&obj, "name"),
            about: get_str(&obj, "about"),
            picture: get_str(&obj, "picture"),
            nip05: get_str(&obj, "nip05"),
            display_name: get_str(&obj, "display_name"),
            lud06: get_str(&obj, "lud06"),
            lud16: get_str(&obj, "lud16"),
            banner: get_str(&obj, "banner"),
            website: get_str(&obj, "website"),
        })
    }

    pub fn to_content(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_empty(&self) -> bool {
        *self == ProfileMetadata::default()
    }
}

/// Cached view of an account, built from its newest metadata event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub pubkey: Pubkey,
    pub following: bool,
    pub metadata: ProfileMetadata,
    pub npub: String,
    pub relays: Vec<String>,
    /// `created_at` of the metadata event this came from, 0 for placeholders
    pub created_at: u64,
}

impl Profile {
    /// Empty profile for an account nothing is known about
    pub fn placeholder(pubkey: Pubkey) -> Self {
        Profile {
            pubkey,
            following: false,
            metadata: ProfileMetadata::default(),
            npub: pubkey.to_bech().unwrap_or_default(),
            relays: Vec::new(),
            created_at: 0,
        }
    }

    pub fn from_metadata_event(event: &Event, following: bool) -> Result<Self> {
        if event.kind != kind::METADATA {
            return Err(Error::Decode(format!(
                "event {} is kind {}, not metadata",
                event.id, event.kind
            )));
        }

        Ok(Profile {
            pubkey: event.pubkey,
            following,
            metadata: ProfileMetadata::from_content(&event.content)?,
            npub: event.pubkey.to_bech().unwrap_or_default(),
            relays: event.extra.relays().to_vec(),
            created_at: event.created_at,
        })
    }

    /// Best name to show: username, then display name, then nip05, then
    /// `??`
    pub fn display_name(&self) -> &str {
        let meta = &self.metadata;
        meta.name
            .as_deref()
            .or(meta.display_name.as_deref())
            .or(meta.nip05.as_deref())
            .unwrap_or("??")
    }
}
