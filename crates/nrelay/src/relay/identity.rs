use std::{
    borrow::Borrow,
    fmt::{self, Display},
};

use url::Url;
use uuid::Uuid;

use crate::Error;

/// Id of one `REQ` on one relay
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelayReqId(pub String);

impl Default for RelayReqId {
    fn default() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl From<String> for RelayReqId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<RelayReqId> for String {
    fn from(value: RelayReqId) -> Self {
        value.0
    }
}

impl From<&str> for RelayReqId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl std::fmt::Display for RelayReqId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Borrow<str> for RelayReqId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A parsed `ws://` or `wss://` relay url in canonical form, so that
/// `wss://nos.lol` and `wss://nos.lol/` name the same relay.
#[derive(Eq, PartialEq, Hash, Clone, Debug, PartialOrd, Ord)]
pub struct NormRelayUrl {
    url: Url,
}

impl NormRelayUrl {
    pub fn new(url: &str) -> Result<Self, Error> {
        let url = Url::parse(url.trim()).map_err(|_| Error::InvalidRelayUrl)?;
        match url.scheme() {
            "ws" | "wss" if url.host().is_some() => Ok(Self { url }),
            _ => Err(Error::InvalidRelayUrl),
        }
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// The http(s) origin serving this relay's NIP-11 document
    pub fn http_url(&self) -> String {
        let url = self.url.as_str().trim_end_matches('/');
        if let Some(rest) = url.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = url.strip_prefix("ws://") {
            format!("http://{rest}")
        } else {
            url.to_owned()
        }
    }
}

impl Display for NormRelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl From<NormRelayUrl> for String {
    fn from(value: NormRelayUrl) -> Self {
        value.url.into()
    }
}
