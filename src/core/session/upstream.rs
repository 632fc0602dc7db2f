//! Upstream pump: microphone blocks out to the service.
//!
//! Audio frames carry raw PCM, so this pump runs its own codec instance
//! with Raw serialization; the rest of the client keeps sending JSON. The
//! pump is not throttled on `user_querying`; the wire contract does not
//! require it, and the service handles overlapping speech itself.

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::core::protocol::{BinaryProtocol, Message, Serialization, events};

use super::DialogSession;

/// Run until cancelled, the capture channel closes, or a send fails. On the
/// way out, tell the service the session is over (event 102).
pub(crate) async fn run(
    session: DialogSession,
    mut audio_rx: mpsc::Receiver<Vec<i16>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut codec = BinaryProtocol::new();
    codec.set_serialization(Serialization::Raw);

    let mut blocks_sent: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("upstream pump cancelled");
                break;
            }
            block = audio_rx.recv() => {
                let Some(block) = block else {
                    info!("capture channel closed");
                    break;
                };
                let message = Message::audio_chunk(session.session_id(), pcm_bytes(&block));
                let frame = match codec.encode(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("failed to encode audio chunk: {e}");
                        break;
                    }
                };
                if let Err(e) = session.transport().send_frame(frame).await {
                    error!("failed to send audio chunk: {e}");
                    break;
                }
                blocks_sent += 1;
            }
        }
    }

    info!("upstream pump exiting after {blocks_sent} blocks");
    finish_session(&session).await;
}

/// Best-effort FinishSession so the service can wind the dialog down.
async fn finish_session(session: &DialogSession) {
    let codec = BinaryProtocol::new();
    let message = Message::full_client(
        events::FINISH_SESSION,
        Some(session.session_id()),
        b"{}".to_vec(),
    );
    match codec.encode(&message) {
        Ok(frame) => {
            if let Err(e) = session.transport().send_frame(frame).await {
                debug!("finish-session send failed: {e}");
            }
        }
        Err(e) => error!("failed to encode finish-session: {e}"),
    }
}

/// Re-encode one capture block as S16LE bytes.
pub(crate) fn pcm_bytes(block: &[i16]) -> Vec<u8> {
    block.iter().flat_map(|s| s.to_le_bytes()).collect()
}
