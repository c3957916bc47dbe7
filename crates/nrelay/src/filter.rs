use serde_derive::{Deserialize, Serialize};

use crate::{Event, NoteId, Pubkey};

/// A query predicate sent to relays in `REQ` messages.
///
/// Empty sets and unset fields are left out of the JSON entirely; relays
/// treat a present-but-empty list as "match nothing".
#[derive(Serialize, Deserialize, Debug, Default, Eq, PartialEq, Clone)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Pubkey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<NoteId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>, // unix timestamp seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authors(mut self, authors: impl IntoIterator<Item = Pubkey>) -> Self {
        for pk in authors {
            if !self.authors.contains(&pk) {
                self.authors.push(pk);
            }
        }
        self
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = NoteId>) -> Self {
        for id in ids {
            if !self.ids.contains(&id) {
                self.ids.push(id);
            }
        }
        self
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u64>) -> Self {
        for kind in kinds {
            if !self.kinds.contains(&kind) {
                self.kinds.push(kind);
            }
        }
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` satisfies this filter. `limit` is applied by each
    /// relay independently and plays no part here.
    pub fn matches(&self, event: &Event) -> bool {
        (self.authors.is_empty() || self.authors.contains(&event.pubkey))
            && (self.ids.is_empty() || self.ids.contains(&event.id))
            && (self.kinds.is_empty() || self.kinds.contains(&event.kind))
            && self.since.is_none_or(|since| event.created_at >= since)
    }

    pub fn to_json(&self) -> Result<String, crate::Error> {
        serde_json::to_string(self).map_err(Into::into)
    }
}
