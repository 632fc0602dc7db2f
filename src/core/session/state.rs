//! Shared dialog state: the two steady-state flags, the set-once dialog id,
//! and the query signal channel.
//!
//! One instance exists per connection and is shared by `Arc` between the
//! pumps, the silence-prompt timer, and the playback buffer. The flags are
//! plain atomics; nothing here takes a lock on the hot path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

/// Query signals buffered between the downstream pump and the silence
/// timer. Signals beyond this are silently dropped.
const QUERY_SIGNAL_CAPACITY: usize = 10;

pub struct DialogState {
    dialog_id: Mutex<Option<String>>,
    connect_id: Mutex<Option<String>>,
    user_querying: AtomicBool,
    sending_chat_tts: Arc<AtomicBool>,
    query_tx: mpsc::Sender<()>,
}

impl DialogState {
    /// Create the state and the receiving end of the query signal channel
    /// (consumed by the silence-prompt timer).
    pub fn new() -> (Arc<Self>, mpsc::Receiver<()>) {
        let (query_tx, query_rx) = mpsc::channel(QUERY_SIGNAL_CAPACITY);
        let state = Arc::new(DialogState {
            dialog_id: Mutex::new(None),
            connect_id: Mutex::new(None),
            user_querying: AtomicBool::new(false),
            sending_chat_tts: Arc::new(AtomicBool::new(false)),
            query_tx,
        });
        (state, query_rx)
    }

    /// Record the dialog id from the session-started payload. Set once per
    /// connection; a second write is ignored.
    pub fn set_dialog_id(&self, id: String) {
        let mut slot = self.dialog_id.lock();
        if let Some(existing) = slot.as_deref() {
            warn!("dialog id already set to {existing}, ignoring {id}");
            return;
        }
        *slot = Some(id);
    }

    pub fn dialog_id(&self) -> Option<String> {
        self.dialog_id.lock().clone()
    }

    /// Record the connect id acknowledged by the server (event 50).
    pub fn set_connect_id(&self, id: String) {
        let mut slot = self.connect_id.lock();
        if slot.is_none() {
            *slot = Some(id);
        }
    }

    pub fn connect_id(&self) -> Option<String> {
        self.connect_id.lock().clone()
    }

    pub fn user_querying(&self) -> bool {
        self.user_querying.load(Ordering::Acquire)
    }

    pub fn set_user_querying(&self, querying: bool) {
        self.user_querying.store(querying, Ordering::Release);
    }

    pub fn sending_chat_tts(&self) -> bool {
        self.sending_chat_tts.load(Ordering::Acquire)
    }

    pub fn set_sending_chat_tts(&self, sending: bool) {
        self.sending_chat_tts.store(sending, Ordering::Release);
    }

    /// The suppression flag shared with the playback buffer.
    pub fn suppression_flag(&self) -> Arc<AtomicBool> {
        self.sending_chat_tts.clone()
    }

    /// Non-blocking query notification; dropped silently when the channel
    /// is full or the timer is gone.
    pub fn signal_query(&self) {
        let _ = self.query_tx.try_send(());
    }
}
