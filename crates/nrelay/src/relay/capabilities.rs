//! NIP-11 relay information documents
//!
//! Fetched over http(s) from the relay's own origin and decoded once into
//! named types.

use http_body_util::{BodyExt, Empty, Limited};
use hyper::{
    body::Bytes,
    header::{self, HeaderValue},
    Request, Uri,
};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Relays that don't say how many subscriptions they allow get one
pub const DEFAULT_MAX_SUBSCRIPTIONS: usize = 1;

/// Maximum body size for NIP-11 response
const MAX_BODY_BYTES: usize = 64 * 1024; // 64KB should be plenty for relay info

/// NIP-11 Relay Information Document
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RelayCapabilities {
    pub name: Option<String>,
    pub description: Option<String>,
    pub pubkey: Option<String>,
    pub contact: Option<String>,
    #[serde(default)]
    pub supported_nips: Vec<u32>,
    #[serde(default)]
    pub supported_nip_extensions: Vec<String>,
    pub software: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub limitation: RelayLimitation,
    pub payments_url: Option<String>,
    #[serde(default)]
    pub fees: RelayFees,
}

/// Server limitations from NIP-11
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RelayLimitation {
    pub max_message_length: Option<usize>,
    pub max_subscriptions: Option<usize>,
    pub max_filters: Option<usize>,
    pub max_limit: Option<usize>,
    pub max_subid_length: Option<usize>,
    pub min_prefix: Option<usize>,
    pub max_event_tags: Option<usize>,
    pub max_content_length: Option<usize>,
    pub min_pow_difficulty: Option<u32>,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub payment_required: bool,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RelayFees {
    #[serde(default)]
    pub admission: Vec<Fee>,
    #[serde(default)]
    pub subscription: Vec<Fee>,
    #[serde(default)]
    pub publication: Vec<Fee>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Fee {
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub unit: String,
    /// seconds
    pub period: Option<u64>,
    #[serde(default)]
    pub kinds: Vec<u64>,
}

impl RelayCapabilities {
    /// Decode a NIP-11 document. A missing or zero `max_subscriptions` is
    /// stored as [`DEFAULT_MAX_SUBSCRIPTIONS`].
    pub fn from_json(bytes: &[u8]) -> Result<Self, CapabilitiesError> {
        let mut caps: RelayCapabilities =
            serde_json::from_slice(bytes).map_err(|e| CapabilitiesError::Parse(e.to_string()))?;

        if caps.limitation.max_subscriptions.unwrap_or(0) == 0 {
            caps.limitation.max_subscriptions = Some(DEFAULT_MAX_SUBSCRIPTIONS);
        }

        Ok(caps)
    }

    pub fn max_subscriptions(&self) -> usize {
        self.limitation
            .max_subscriptions
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_SUBSCRIPTIONS)
    }

    pub fn supports_nip(&self, nip: u32) -> bool {
        self.supported_nips.contains(&nip)
    }
}

#[derive(Debug, Error)]
pub enum CapabilitiesError {
    #[error("Invalid relay URL")]
    InvalidUrl,
    #[error("TLS initialization error")]
    TlsError,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("HTTP status: {0}")]
    HttpStatus(u16),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("timed out")]
    Timeout,
}

/// GET the NIP-11 document from `http_url`, which must already be the
/// http(s) form of the relay url.
pub async fn fetch(http_url: &str) -> Result<RelayCapabilities, CapabilitiesError> {
    if !http_url.starts_with("https://") && !http_url.starts_with("http://") {
        return Err(CapabilitiesError::InvalidUrl);
    }
    let uri: Uri = http_url.parse().map_err(|_| CapabilitiesError::InvalidUrl)?;

    let https = {
        let builder = HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|_| CapabilitiesError::TlsError)?;
        builder.https_or_http().enable_http1().build()
    };

    let client: Client<_, Empty<Bytes>> = Client::builder(TokioExecutor::new()).build(https);

    let authority = uri.authority().ok_or(CapabilitiesError::InvalidUrl)?.clone();

    let req = Request::builder()
        .uri(&uri)
        .header(header::HOST, authority.as_str())
        .header(
            header::ACCEPT,
            HeaderValue::from_static("application/nostr+json"),
        )
        .body(Empty::<Bytes>::new())
        .map_err(|e| CapabilitiesError::Http(e.to_string()))?;

    debug!("fetching NIP-11 from {}", http_url);

    let res = client
        .request(req)
        .await
        .map_err(|e| CapabilitiesError::Http(e.to_string()))?;

    if !res.status().is_success() {
        return Err(CapabilitiesError::HttpStatus(res.status().as_u16()));
    }

    let content_type = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !content_type.contains("application/nostr+json")
        && !content_type.contains("application/json")
    {
        warn!(
            "relay {} returned unexpected content type: {}",
            http_url, content_type
        );
    }

    let limited_body = Limited::new(res.into_body(), MAX_BODY_BYTES);
    let collected = BodyExt::collect(limited_body)
        .await
        .map_err(|e| CapabilitiesError::Http(e.to_string()))?;

    let caps = RelayCapabilities::from_json(&collected.to_bytes())?;

    debug!(
        "got NIP-11 for {}: max_subscriptions={}",
        http_url,
        caps.max_subscriptions()
    );

    Ok(caps)
}
