//! Downstream pump: decode server frames and dispatch on (type, event).
//!
//! This is where the steady-state dialog behavior lives: reply audio into
//! the playback buffer, ASR events driving the `user_querying` flag and the
//! query signal, the chat-TTS acknowledgement clearing suppression, and the
//! session/connection lifecycle events ending the loop.

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::core::protocol::{BinaryProtocol, Message, MessageType, events};
use crate::core::session::payloads::{SessionStartedPayload, TtsTypePayload};
use crate::core::transport::TransportError;

use super::DialogSession;

/// Why the downstream pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DownstreamEnd {
    /// The server finished the session (event 152/153).
    SessionFinished,
    /// The server sent an Error frame.
    ServerError(u32),
    /// The transport closed or failed.
    TransportClosed,
    /// A frame we cannot handle in steady state.
    ProtocolUnexpected,
    /// External shutdown.
    Cancelled,
}

pub(crate) async fn run(
    session: DialogSession,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> DownstreamEnd {
    let codec = BinaryProtocol::new();
    loop {
        let frame = tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("downstream pump cancelled");
                return DownstreamEnd::Cancelled;
            }
            frame = session.transport().receive_frame() => frame,
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(TransportError::Closed) => {
                info!("transport closed, downstream pump exiting");
                return DownstreamEnd::TransportClosed;
            }
            Err(e) => {
                error!("downstream receive failed: {e}");
                return DownstreamEnd::TransportClosed;
            }
        };

        let message = match codec.decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                error!("failed to decode downstream frame: {e}");
                return DownstreamEnd::ProtocolUnexpected;
            }
        };

        if let Some(end) = dispatch(&session, message) {
            return end;
        }
    }
}

/// Handle one decoded frame; `Some` ends the pump.
fn dispatch(session: &DialogSession, message: Message) -> Option<DownstreamEnd> {
    match message.msg_type {
        MessageType::FullServer => dispatch_server_event(session, &message),
        MessageType::AudioOnlyServer => {
            // The buffer drops the payload itself while a chat-TTS
            // injection is suppressing playback.
            session.playback().push_bytes(&message.payload);
            None
        }
        MessageType::Error => {
            let code = message.error_code.unwrap_or(0);
            error!(
                "server error {code}: {}",
                String::from_utf8_lossy(&message.payload)
            );
            Some(DownstreamEnd::ServerError(code))
        }
        other => {
            warn!("unexpected downstream message type: {other}");
            Some(DownstreamEnd::ProtocolUnexpected)
        }
    }
}

fn dispatch_server_event(session: &DialogSession, message: &Message) -> Option<DownstreamEnd> {
    debug!(
        "server event {:?}: {}",
        message.event,
        String::from_utf8_lossy(&message.payload)
    );
    match message.event {
        Some(events::CONNECTION_STARTED) => {
            // Consumed during the handshake; seeing it here is unusual but
            // not fatal.
            warn!("connection-started ack received in steady state");
            None
        }
        Some(events::SESSION_STARTED) => {
            match serde_json::from_slice::<SessionStartedPayload>(&message.payload) {
                Ok(payload) => {
                    info!("session started, dialog id: {}", payload.dialog_id);
                    session.state().set_dialog_id(payload.dialog_id);
                }
                Err(e) => warn!("unparseable session-started payload: {e}"),
            }
            None
        }
        Some(events::SESSION_FINISHED) | Some(events::SESSION_FAILED) => {
            info!("session finished by server (event {:?})", message.event);
            Some(DownstreamEnd::SessionFinished)
        }
        Some(events::TTS_TYPE_INFO) => {
            if session.state().sending_chat_tts() {
                match serde_json::from_slice::<TtsTypePayload>(&message.payload) {
                    Ok(payload) if payload.tts_type.as_deref() == Some("chat_tts_text") => {
                        info!("chat TTS injection acknowledged, resuming playback");
                        session.playback().flush();
                        session.state().set_sending_chat_tts(false);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("unparseable tts-type payload: {e}"),
                }
            }
            None
        }
        Some(events::ASR_INFO) => {
            info!("user started speaking, flushing pending playback");
            session.playback().flush();
            session.state().signal_query();
            session.state().set_user_querying(true);
            None
        }
        Some(events::ASR_ENDED) => {
            info!("user query finished");
            session.state().set_user_querying(false);
            if rand::random::<bool>() {
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.send_chat_tts_sequence().await {
                        error!("chat TTS injection failed: {e}");
                    }
                });
            }
            None
        }
        _ => None,
    }
}
