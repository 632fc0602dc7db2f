//! Duplex frame transport over WebSocket.
//!
//! The service speaks whole binary frames; WebSocket message boundaries are
//! the frame boundaries. The write path is serialized by a single mutex so a
//! frame from one producer is never interleaved with another's; the read
//! path has exactly one consumer (the downstream pump). Transport failures
//! surface to the caller; there are no retries here, the session
//! controller decides what a failure means.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;

/// Transport failure modes.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("invalid endpoint or header: {0}")]
    InvalidRequest(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
    #[error("connection closed by peer")]
    Closed,
}

/// One whole-frame duplex pipe.
///
/// `send_frame` blocks until the frame is flushed; concurrent senders are
/// serialized. `receive_frame` blocks until one complete binary message has
/// been reassembled and returns its bytes, or a terminal error once the
/// peer has closed.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError>;
    async fn receive_frame(&self) -> Result<Vec<u8>, TransportError>;
    async fn close(&self) -> Result<(), TransportError>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Production transport over `tokio-tungstenite`.
pub struct WsTransport {
    writer: Mutex<WsSink>,
    reader: Mutex<WsSource>,
    connect_id: String,
}

impl WsTransport {
    /// Dial the dialog endpoint with the service's authentication headers
    /// and a freshly generated connect id.
    pub async fn connect(config: &ClientConfig) -> Result<Self, TransportError> {
        let connect_id = Uuid::new_v4().to_string();
        let mut request = config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let headers = request.headers_mut();
        for (name, value) in [
            ("X-Api-Resource-Id", config.resource_id.as_str()),
            ("X-Api-Access-Key", config.access_key.as_str()),
            ("X-Api-App-Key", config.app_key.as_str()),
            ("X-Api-App-ID", config.app_id.as_str()),
            ("X-Api-Connect-Id", connect_id.as_str()),
        ] {
            headers.insert(
                name,
                value
                    .parse()
                    .map_err(|_| TransportError::InvalidRequest(format!("bad {name} value")))?,
            );
        }

        let (ws_stream, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        if let Some(logid) = response.headers().get("X-Tt-Logid") {
            info!("dialog endpoint dialed, logid: {:?}", logid);
        } else {
            info!("dialog endpoint dialed");
        }

        let (writer, reader) = ws_stream.split();
        Ok(WsTransport {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            connect_id,
        })
    }

    /// The connect id sent in `X-Api-Connect-Id` for this dial.
    pub fn connect_id(&self) -> &str {
        &self.connect_id
    }
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer
            .send(WsMessage::Binary(Bytes::from(frame)))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn receive_frame(&self) -> Result<Vec<u8>, TransportError> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(WsMessage::Binary(bytes))) => return Ok(bytes.to_vec()),
                Some(Ok(WsMessage::Close(frame))) => {
                    info!("peer closed the connection: {:?}", frame);
                    return Err(TransportError::Closed);
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                    // Keepalive traffic; pongs are produced by the library.
                    continue;
                }
                Some(Ok(WsMessage::Text(text))) => {
                    warn!("ignoring unexpected text frame: {} bytes", text.len());
                    continue;
                }
                Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => return Err(TransportError::Closed),
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        debug!("closing transport");
        writer
            .send(WsMessage::Close(None))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}
