use std::array::TryFromSliceError;
use thiserror::Error;

use crate::relay::capabilities::CapabilitiesError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("message is empty")]
    Empty,

    #[error("decoding failed: {0}")]
    DecodeFailed(String),

    #[error("hex decoding failed")]
    HexDecodeFailed,

    #[error("invalid bech32")]
    InvalidBech32,

    #[error("invalid byte size")]
    InvalidByteSize,

    #[error("invalid relay url")]
    InvalidRelayUrl,

    /// Transport or handshake failure
    #[error("connection error: {0}")]
    Connection(String),

    #[error("relay is not connected")]
    NotConnected,

    #[error("relay is already connected")]
    AlreadyConnected,

    /// No end-of-stored-events (or OK) arrived before the deadline
    #[error("timed out")]
    Timeout,

    #[error("query error: {0}")]
    Query(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    /// A signed event that no relay accepted
    #[error("publish rejected: {0}")]
    PublishRejected(String),

    #[error("capabilities: {0}")]
    Capabilities(#[from] CapabilitiesError),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Generic(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(s)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(_e: TryFromSliceError) -> Self {
        Error::InvalidByteSize
    }
}

impl From<hex::FromHexError> for Error {
    fn from(_e: hex::FromHexError) -> Self {
        Error::HexDecodeFailed
    }
}
