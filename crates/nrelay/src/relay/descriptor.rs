use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

fn yes() -> bool {
    true
}

/// A configured relay: where it is and what we may use it for.
///
/// Missing flags default to on, so `{"url": "wss://nos.lol"}` is a
/// read/write relay.
#[derive(Clone, Serialize, Deserialize)]
pub struct RelayDescriptor {
    pub url: String,
    #[serde(default = "yes")]
    pub read: bool,
    #[serde(default = "yes")]
    pub write: bool,
    #[serde(default = "yes")]
    pub enabled: bool,
}

impl RelayDescriptor {
    pub fn new(url: impl Into<String>, read: bool, write: bool) -> Self {
        RelayDescriptor {
            url: url.into(),
            read,
            write,
            enabled: true,
        }
    }

    /// read, write, enabled
    pub fn read_write(url: impl Into<String>) -> Self {
        Self::new(url, true, true)
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// just the url part
impl fmt::Display for RelayDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

// add the flags
impl fmt::Debug for RelayDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self)?;
        if self.read {
            write!(f, " [r]")?;
        }
        if self.write {
            write!(f, " [w]")?;
        }
        if !self.enabled {
            write!(f, " [off]")?;
        }
        Ok(())
    }
}

// Only the url is considered, two descriptors which differ only in flags
// name the same relay.

impl PartialEq for RelayDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for RelayDescriptor {}

impl PartialOrd for RelayDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RelayDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.url.cmp(&other.url)
    }
}
