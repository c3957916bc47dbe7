use std::io;

/// Orchestrator related errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("relay error: {0}")]
    Relay(#[from] nrelay::Error),

    /// Metadata content that is not a JSON object
    #[error("decode error: {0}")]
    Decode(String),

    #[error("no signer configured for this identity")]
    NoSigner,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("generic error: {0}")]
    Generic(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Generic(s)
    }
}
