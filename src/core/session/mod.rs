//! Dialog session lifecycle: handshake, steady state, and shutdown.
//!
//! A [`DialogSession`] owns everything one dialog needs (the transport,
//! the shared state, the playback buffer, and the shutdown signal) and is
//! cheap to clone into worker tasks. The flow mirrors the wire contract:
//!
//! 1. `handshake`: StartConnection → ConnectionStarted, StartSession →
//!    SessionStarted (records the dialog id), SayHello.
//! 2. `run`: upstream and downstream pumps plus the silence-prompt timer,
//!    until the server finishes the session, a pump fails, or shutdown is
//!    requested externally.
//! 3. wind-down: cancel workers, FinishConnection → ConnectionFinished
//!    (best-effort), close the transport.

mod downstream;
mod payloads;
mod state;
mod upstream;

pub use payloads::{
    AudioConfig, ChatTtsTextPayload, DialogPayload, SayHelloPayload, SessionStartedPayload,
    StartSessionPayload, TtsPayload, TtsTypePayload,
};
pub use state::DialogState;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::core::audio::PlaybackBuffer;
use crate::core::protocol::{BinaryProtocol, Message, MessageType, events};
use crate::core::transport::FrameTransport;
use crate::errors::{ClientError, ClientResult};

/// How long workers get to exit after the shutdown signal before they are
/// abandoned and aborted.
const WORKER_EXIT_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait for the server's connection-finished ack.
const FINISH_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// One dialog over one connection.
#[derive(Clone)]
pub struct DialogSession {
    config: Arc<ClientConfig>,
    transport: Arc<dyn FrameTransport>,
    state: Arc<DialogState>,
    playback: Arc<PlaybackBuffer>,
    session_id: String,
    shutdown: broadcast::Sender<()>,
}

impl DialogSession {
    /// Build a session around an established transport. `playback` must
    /// share its suppression flag with `state` (see
    /// [`DialogState::suppression_flag`]).
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn FrameTransport>,
        state: Arc<DialogState>,
        playback: Arc<PlaybackBuffer>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        DialogSession {
            config: Arc::new(config),
            transport,
            state,
            playback,
            session_id: Uuid::new_v4().to_string(),
            shutdown,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> &Arc<DialogState> {
        &self.state
    }

    pub(crate) fn transport(&self) -> &Arc<dyn FrameTransport> {
        &self.transport
    }

    pub(crate) fn playback(&self) -> &Arc<PlaybackBuffer> {
        &self.playback
    }

    /// A handle that triggers shutdown when sent to (e.g. from a ctrl-c
    /// handler).
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Synchronous connection and session establishment. Every failure here
    /// is fatal; no worker has started yet.
    pub async fn handshake(&self) -> ClientResult<()> {
        let codec = BinaryProtocol::new();

        self.send(
            &codec,
            Message::full_client(events::START_CONNECTION, None, b"{}".to_vec()),
        )
        .await?;
        let started = self.expect_event(&codec, events::CONNECTION_STARTED).await?;
        if let Some(connect_id) = started.connect_id {
            info!("connection started, connect id: {connect_id}");
            self.state.set_connect_id(connect_id);
        }

        let session_config = self.start_session_payload();
        self.send(
            &codec,
            Message::full_client(
                events::START_SESSION,
                Some(&self.session_id),
                serde_json::to_vec(&session_config)?,
            ),
        )
        .await?;
        let started = self.expect_event(&codec, events::SESSION_STARTED).await?;
        let payload: SessionStartedPayload = serde_json::from_slice(&started.payload)?;
        info!("session started, dialog id: {}", payload.dialog_id);
        self.state.set_dialog_id(payload.dialog_id);

        self.say_hello(&self.config.greeting).await?;
        Ok(())
    }

    /// Steady state: run both pumps and the silence-prompt timer until the
    /// downstream pump ends the dialog or shutdown is requested, then wind
    /// everything down.
    pub async fn run(
        &self,
        audio_rx: mpsc::Receiver<Vec<i16>>,
        query_rx: mpsc::Receiver<()>,
    ) -> ClientResult<()> {
        let mut downstream = tokio::spawn(downstream::run(
            self.clone(),
            self.shutdown.subscribe(),
        ));
        let upstream = tokio::spawn(upstream::run(
            self.clone(),
            audio_rx,
            self.shutdown.subscribe(),
        ));
        let silence = tokio::spawn(silence_prompt(
            self.clone(),
            query_rx,
            self.shutdown.subscribe(),
        ));
        let mut shutdown_rx = self.shutdown.subscribe();

        let mut downstream_done = false;
        tokio::select! {
            end = &mut downstream => {
                downstream_done = true;
                match end {
                    Ok(reason) => info!("downstream pump finished: {reason:?}"),
                    Err(e) => error!("downstream pump panicked: {e}"),
                }
            }
            _ = shutdown_rx.recv() => info!("shutdown requested, stopping workers"),
        }

        let _ = self.shutdown.send(());
        if !downstream_done {
            join_worker("downstream", downstream).await;
        }
        join_worker("upstream", upstream).await;
        join_worker("silence-prompt", silence).await;

        self.finish_connection().await;
        if let Err(e) = self.transport.close().await {
            debug!("transport close failed: {e}");
        }
        Ok(())
    }

    /// Ask the bot to speak `content` (event 300). No acknowledgement is
    /// expected.
    pub async fn say_hello(&self, content: &str) -> ClientResult<()> {
        let codec = BinaryProtocol::new();
        let payload = serde_json::to_vec(&SayHelloPayload {
            content: content.to_owned(),
        })?;
        self.send(
            &codec,
            Message::full_client(events::SAY_HELLO, Some(&self.session_id), payload),
        )
        .await
    }

    /// Inject the configured chat-TTS rounds (event 500): opening and
    /// closing chunk per round, with a gap between rounds.
    ///
    /// Never sent while the user is mid-query; the call degrades to an
    /// error log. Playback suppression stays on until the server
    /// acknowledges with event 350 (`tts_type = "chat_tts_text"`), or is
    /// rolled back here if a send fails.
    pub async fn send_chat_tts_sequence(&self) -> ClientResult<()> {
        if self.state.user_querying() {
            error!("chat TTS injection rejected: user query in progress");
            return Ok(());
        }
        self.state.set_sending_chat_tts(true);
        let result = self.send_chat_tts_rounds().await;
        if result.is_err() {
            self.state.set_sending_chat_tts(false);
        }
        result
    }

    async fn send_chat_tts_rounds(&self) -> ClientResult<()> {
        let codec = BinaryProtocol::new();
        for (index, round) in self.config.chat_tts_rounds.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.chat_tts_round_gap).await;
            }
            for (start, end, content) in [
                (true, false, round.opening.as_str()),
                (false, true, round.closing.as_str()),
            ] {
                let payload = serde_json::to_vec(&ChatTtsTextPayload {
                    start,
                    end,
                    content: content.to_owned(),
                })?;
                self.send(
                    &codec,
                    Message::full_client(events::CHAT_TTS_TEXT, Some(&self.session_id), payload),
                )
                .await?;
            }
        }
        Ok(())
    }

    fn start_session_payload(&self) -> StartSessionPayload {
        let mut extra = Map::new();
        extra.insert("strict_audit".into(), Value::Bool(false));
        extra.insert(
            "audit_response".into(),
            Value::String(self.config.audit_response.clone()),
        );
        StartSessionPayload {
            tts: TtsPayload {
                audio_config: AudioConfig {
                    channel: 1,
                    format: "pcm".into(),
                    sample_rate: crate::core::audio::OUTPUT_SAMPLE_RATE,
                },
            },
            dialog: DialogPayload {
                bot_name: self.config.bot_name.clone(),
                system_role: self.config.system_role.clone(),
                speaking_style: self.config.speaking_style.clone(),
                extra,
            },
        }
    }

    async fn send(&self, codec: &BinaryProtocol, message: Message) -> ClientResult<()> {
        let frame = codec.encode(&message)?;
        self.transport.send_frame(frame).await?;
        Ok(())
    }

    /// Receive one frame and require a full-server message with the given
    /// event. Server error frames are surfaced as [`ClientError::Server`].
    async fn expect_event(&self, codec: &BinaryProtocol, expected: i32) -> ClientResult<Message> {
        let frame = self.transport.receive_frame().await?;
        let message = codec.decode(&frame)?;
        if message.msg_type == MessageType::Error {
            return Err(ClientError::Server {
                code: message.error_code.unwrap_or(0),
                detail: String::from_utf8_lossy(&message.payload).into_owned(),
            });
        }
        if message.msg_type != MessageType::FullServer || message.event != Some(expected) {
            return Err(ClientError::Handshake(format!(
                "expected server event {expected}, got {} event {:?}",
                message.msg_type, message.event
            )));
        }
        Ok(message)
    }

    /// FinishConnection (event 2) and a best-effort wait for the server's
    /// ConnectionFinished (event 52). Runs after the pumps have exited, so
    /// this is the only receiver left.
    async fn finish_connection(&self) {
        let codec = BinaryProtocol::new();
        let finish = Message::full_client(events::FINISH_CONNECTION, None, b"{}".to_vec());
        let frame = match codec.encode(&finish) {
            Ok(frame) => frame,
            Err(e) => {
                error!("failed to encode finish-connection: {e}");
                return;
            }
        };
        if let Err(e) = self.transport.send_frame(frame).await {
            debug!("finish-connection send failed: {e}");
            return;
        }

        match timeout(FINISH_ACK_TIMEOUT, self.transport.receive_frame()).await {
            Ok(Ok(frame)) => match codec.decode(&frame) {
                Ok(message) if message.event == Some(events::CONNECTION_FINISHED) => {
                    info!("connection finished by server");
                }
                Ok(message) => warn!(
                    "unexpected reply while closing: {} event {:?}",
                    message.msg_type, message.event
                ),
                Err(e) => warn!("unparseable reply while closing: {e}"),
            },
            Ok(Err(e)) => debug!("no connection-finished ack: {e}"),
            Err(_) => warn!("timed out waiting for connection-finished ack"),
        }
    }
}

/// Wait on the query signal or the configured silence window; on timeout,
/// greet the user again. A query signal just restarts the wait.
async fn silence_prompt(
    session: DialogSession,
    mut query_rx: mpsc::Receiver<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("silence-prompt timer cancelled");
                break;
            }
            signal = query_rx.recv() => {
                if signal.is_none() {
                    debug!("query signal channel closed");
                    break;
                }
                info!("user query signal received, resetting silence window");
            }
            _ = tokio::time::sleep(session.config.silence_prompt) => {
                if session.state.user_querying() {
                    continue;
                }
                info!("silence window elapsed, sending follow-up greeting");
                if let Err(e) = session.say_hello(&session.config.follow_up_greeting).await {
                    warn!("follow-up greeting failed: {e}");
                }
            }
        }
    }
}

async fn join_worker<T>(name: &str, mut handle: JoinHandle<T>) {
    match timeout(WORKER_EXIT_TIMEOUT, &mut handle).await {
        Ok(_) => debug!("{name} worker exited"),
        Err(_) => {
            warn!("{name} worker did not exit within {WORKER_EXIT_TIMEOUT:?}, aborting");
            handle.abort();
        }
    }
}
