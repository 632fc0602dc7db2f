//! Wire message model for the realtime dialog protocol.
//!
//! A [`Message`] is one self-describing frame: a message type, a 4-bit flag
//! set, and a handful of optional sub-fields whose presence is governed by
//! the type, the flags, and the event number. The byte-level layout lives in
//! [`super::codec`]; this module only models the fields and their presence
//! rules.

use std::fmt;

/// Dialog event numbers used on the wire.
///
/// These are part of the service contract and must be sent verbatim.
pub mod events {
    /// C→S: open a connection-level handshake.
    pub const START_CONNECTION: i32 = 1;
    /// C→S: close the connection-level association.
    pub const FINISH_CONNECTION: i32 = 2;
    /// S→C: connection handshake acknowledged.
    pub const CONNECTION_STARTED: i32 = 50;
    /// S→C: connection handshake rejected.
    pub const CONNECTION_FAILED: i32 = 51;
    /// S→C: connection closed by the server.
    pub const CONNECTION_FINISHED: i32 = 52;
    /// C→S: open a dialog session.
    pub const START_SESSION: i32 = 100;
    /// C→S: close the dialog session.
    pub const FINISH_SESSION: i32 = 102;
    /// S→C: session established; payload carries `dialog_id`.
    pub const SESSION_STARTED: i32 = 150;
    /// S→C: session ended normally.
    pub const SESSION_FINISHED: i32 = 152;
    /// S→C: session ended (failure variant).
    pub const SESSION_FAILED: i32 = 153;
    /// C→S: one chunk of upstream microphone audio.
    pub const TASK_REQUEST: i32 = 200;
    /// C→S: ask the bot to speak a greeting; payload `{content}`.
    pub const SAY_HELLO: i32 = 300;
    /// S→C: TTS kind notification; payload carries `tts_type`.
    pub const TTS_TYPE_INFO: i32 = 350;
    /// S→C: ASR detected the user speaking.
    pub const ASR_INFO: i32 = 450;
    /// S→C: the user's query finished.
    pub const ASR_ENDED: i32 = 459;
    /// C→S: injected chat TTS text; payload `{start, end, content}`.
    pub const CHAT_TTS_TEXT: i32 = 500;

    /// Connection-level events never carry a session id on the wire.
    pub fn omits_session_id(event: i32) -> bool {
        matches!(
            event,
            START_CONNECTION
                | FINISH_CONNECTION
                | CONNECTION_STARTED
                | CONNECTION_FAILED
                | CONNECTION_FINISHED
        )
    }

    /// Connection acknowledgements carry a connect id instead.
    pub fn carries_connect_id(event: i32) -> bool {
        matches!(
            event,
            CONNECTION_STARTED | CONNECTION_FAILED | CONNECTION_FINISHED
        )
    }
}

/// Message type, encoded in the high nibble of the second header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Client request with a structured (JSON) payload.
    FullClient,
    /// Client request whose payload is raw audio.
    AudioOnlyClient,
    /// Server response with a structured payload.
    FullServer,
    /// Server response whose payload is raw audio (alias: server ACK).
    AudioOnlyServer,
    /// Server front-end (ASR) result.
    FrontEndResultServer,
    /// Server-signalled error; carries an error code.
    Error,
}

impl MessageType {
    /// The 4-bit wire encoding of this type.
    pub fn bits(self) -> u8 {
        match self {
            MessageType::FullClient => 0b0001,
            MessageType::AudioOnlyClient => 0b0010,
            MessageType::FullServer => 0b1001,
            MessageType::AudioOnlyServer => 0b1011,
            MessageType::FrontEndResultServer => 0b1100,
            MessageType::Error => 0b1111,
        }
    }

    /// Inverse of [`MessageType::bits`]; `None` for unassigned bit patterns.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b0001 => Some(MessageType::FullClient),
            0b0010 => Some(MessageType::AudioOnlyClient),
            0b1001 => Some(MessageType::FullServer),
            0b1011 => Some(MessageType::AudioOnlyServer),
            0b1100 => Some(MessageType::FrontEndResultServer),
            0b1111 => Some(MessageType::Error),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::FullClient => "full-client",
            MessageType::AudioOnlyClient => "audio-only-client",
            MessageType::FullServer => "full-server",
            MessageType::AudioOnlyServer => "audio-only-server",
            MessageType::FrontEndResultServer => "front-end-result-server",
            MessageType::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// 4-bit flag set in the low nibble of the second header byte.
///
/// The two low bits form the sequence group (no-seq / positive-seq /
/// last-no-seq / negative-seq, mutually exclusive by construction); the
/// with-event bit is independent of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageFlags(u8);

impl MessageFlags {
    pub const NO_SEQ: MessageFlags = MessageFlags(0b0000);
    pub const POSITIVE_SEQ: MessageFlags = MessageFlags(0b0001);
    pub const LAST_NO_SEQ: MessageFlags = MessageFlags(0b0010);
    pub const NEGATIVE_SEQ: MessageFlags = MessageFlags(0b0011);
    pub const WITH_EVENT: MessageFlags = MessageFlags(0b0100);

    /// Reconstruct flags from the low nibble of a header byte.
    pub fn from_bits(bits: u8) -> Self {
        MessageFlags(bits & 0x0F)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// True when every bit of `other` is set in `self`.
    ///
    /// Note that negative-seq (0b11) contains positive-seq (0b01); callers
    /// checking the sequence group should test the group value, not single
    /// bits.
    pub fn contains(self, other: MessageFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// The two-bit sequence group value.
    pub fn sequence_group(self) -> u8 {
        self.0 & 0b0011
    }

    pub fn with_event(self) -> bool {
        self.contains(MessageFlags::WITH_EVENT)
    }

    /// Combine flag sets.
    pub fn union(self, other: MessageFlags) -> MessageFlags {
        MessageFlags(self.0 | other.0)
    }
}

/// Predicate deciding whether a frame with the given flags carries the
/// 4-byte sequence sub-field. Injected into the codec rather than hard-coded
/// so the codec stays pure and testable.
pub type SequencePredicate = fn(MessageFlags) -> bool;

/// The client-side rule: a sequence is present iff the positive-seq or
/// negative-seq group value is set.
pub fn contains_sequence(flags: MessageFlags) -> bool {
    let group = flags.sequence_group();
    group == MessageFlags::POSITIVE_SEQ.bits() || group == MessageFlags::NEGATIVE_SEQ.bits()
}

/// One wire frame, decoded or about to be encoded.
///
/// Optional fields follow the presence rules of the protocol: `event` iff
/// the with-event flag is set, `session_id` iff with-event and the event is
/// not connection-level, `connect_id` for connection acknowledgements,
/// `sequence` iff the sequence predicate holds, `error_code` iff the type
/// is [`MessageType::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub flags: MessageFlags,
    pub event: Option<i32>,
    pub session_id: Option<String>,
    pub connect_id: Option<String>,
    pub sequence: Option<i32>,
    pub error_code: Option<u32>,
    pub payload: Vec<u8>,
}

impl Message {
    /// A full-client frame carrying an event and a structured payload.
    pub fn full_client(event: i32, session_id: Option<&str>, payload: Vec<u8>) -> Self {
        Message {
            msg_type: MessageType::FullClient,
            flags: MessageFlags::WITH_EVENT,
            event: Some(event),
            session_id: session_id.map(str::to_owned),
            connect_id: None,
            sequence: None,
            error_code: None,
            payload,
        }
    }

    /// An upstream audio chunk (event 200, raw PCM payload).
    pub fn audio_chunk(session_id: &str, pcm: Vec<u8>) -> Self {
        Message {
            msg_type: MessageType::AudioOnlyClient,
            flags: MessageFlags::WITH_EVENT,
            event: Some(events::TASK_REQUEST),
            session_id: Some(session_id.to_owned()),
            connect_id: None,
            sequence: None,
            error_code: None,
            payload: pcm,
        }
    }

    /// A full-server frame, as the service would emit it.
    pub fn full_server(event: i32, session_id: Option<&str>, payload: Vec<u8>) -> Self {
        Message {
            msg_type: MessageType::FullServer,
            flags: MessageFlags::WITH_EVENT,
            event: Some(event),
            session_id: session_id.map(str::to_owned),
            connect_id: None,
            sequence: None,
            error_code: None,
            payload,
        }
    }
}
