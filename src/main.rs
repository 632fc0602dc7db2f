use std::sync::Arc;

use anyhow::anyhow;
use tracing::{info, warn};

use voicelink::config::ClientConfig;
use voicelink::core::audio::{self, PlaybackBuffer};
use voicelink::core::session::{DialogSession, DialogState};
use voicelink::core::transport::{FrameTransport, WsTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let config = ClientConfig::from_env().map_err(|e| anyhow!("{e}"))?;
    info!("dialing dialog service at {}", config.endpoint_host());

    let transport: Arc<dyn FrameTransport> = Arc::new(WsTransport::connect(&config).await?);

    let (state, query_rx) = DialogState::new();
    let playback = Arc::new(PlaybackBuffer::new(state.suppression_flag()));

    let (capture, audio_rx) = audio::start_capture()?;
    let playback_stream = audio::start_playback(playback.clone())?;

    let dump_path = config.dump_path.clone();
    let session = DialogSession::new(config, transport, state.clone(), playback.clone());
    session.handshake().await?;

    // First interrupt triggers an orderly shutdown.
    let shutdown = session.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown.send(());
        }
    });

    let result = session.run(audio_rx, query_rx).await;

    capture.close();
    playback_stream.close();

    match playback.dump_diagnostic(&dump_path) {
        Ok(0) => info!("no downstream audio captured, skipping diagnostic dump"),
        Ok(bytes) => info!("wrote {bytes} bytes of raw PCM to {}", dump_path.display()),
        Err(e) => warn!("diagnostic dump failed: {e}"),
    }

    if let Some(dialog_id) = state.dialog_id() {
        info!("dialog finished, dialog id: {dialog_id}");
    }

    Ok(result?)
}
