//! Hook error types

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HookError {
    #[error("invalid webhook config: {message}")]
    InvalidConfig { message: String },

    #[error("webhook {url} returned {status}: {body}")]
    RemoteError {
        url: String,
        status: u16,
        body: String,
    },

    #[error("webhook request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("can't decode webhook response from {url}: {source}")]
    DecodeResponse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize hook request: {0}")]
    EncodeRequest(#[from] serde_json::Error),
}

impl HookError {
    /// True if the failure came from the remote endpoint rather than from
    /// the transport or our own serialization.
    pub fn is_remote(&self) -> bool {
        matches!(self, HookError::RemoteError { .. })
    }
}

pub type Result<T> = std::result::Result<T, HookError>;
