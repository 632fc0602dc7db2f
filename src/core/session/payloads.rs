//! JSON payload bodies exchanged with the dialog service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of the StartSession request (event 100).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionPayload {
    pub tts: TtsPayload,
    pub dialog: DialogPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsPayload {
    pub audio_config: AudioConfig,
}

/// Reply-audio format requested from the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub channel: u32,
    pub format: String,
    pub sample_rate: u32,
}

/// Persona configuration for the dialog bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogPayload {
    pub bot_name: String,
    pub system_role: String,
    pub speaking_style: String,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// Body of a SayHello request (event 300).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SayHelloPayload {
    pub content: String,
}

/// Body of one ChatTTSText chunk (event 500).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTtsTextPayload {
    pub start: bool,
    pub end: bool,
    pub content: String,
}

/// Fields we read from the SessionStarted payload (event 150).
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartedPayload {
    pub dialog_id: String,
}

/// Fields we read from a TTS-type notification (event 350).
#[derive(Debug, Clone, Deserialize)]
pub struct TtsTypePayload {
    #[serde(default)]
    pub tts_type: Option<String>,
}
