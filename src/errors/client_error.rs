//! Client-wide error type.

use crate::core::audio::AudioError;
use crate::core::protocol::ProtocolError;
use crate::core::transport::TransportError;

/// Umbrella error for everything a dialog run can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("audio device error: {0}")]
    Audio(#[from] AudioError),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("server error {code}: {detail}")]
    Server { code: u32, detail: String },
}

/// Result type alias for convenience
pub type ClientResult<T> = Result<T, ClientError>;
