//! Client configuration.
//!
//! Configuration comes from environment variables, with a `.env` file
//! loaded first when present. Every knob has a default except the service
//! credentials; validation rejects configurations that could only fail at
//! dial time.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

mod validation;

use validation::{validate_credentials, validate_endpoint};

/// One round of injected chat-TTS text: the opening chunk
/// (`start=true,end=false`) and the closing chunk (`start=false,end=true`).
#[derive(Debug, Clone)]
pub struct ChatTtsRound {
    pub opening: String,
    pub closing: String,
}

/// Everything the client needs to dial and run one dialog.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the realtime dialog service.
    pub endpoint: String,
    /// Value for the `X-Api-Resource-Id` header.
    pub resource_id: String,
    /// Value for the `X-Api-App-ID` header.
    pub app_id: String,
    /// Value for the `X-Api-Access-Key` header.
    pub access_key: String,
    /// Value for the `X-Api-App-Key` header.
    pub app_key: String,

    // Dialog persona sent in the start-session payload.
    pub bot_name: String,
    pub system_role: String,
    pub speaking_style: String,
    /// Canned reply the service uses when it declines to answer.
    pub audit_response: String,

    /// Greeting spoken right after the session starts.
    pub greeting: String,
    /// Greeting spoken when the user has been silent for a while.
    pub follow_up_greeting: String,
    /// Silence window before the follow-up greeting fires.
    pub silence_prompt: Duration,

    /// Injected chat-TTS rounds, sent in order with a gap between them.
    pub chat_tts_rounds: Vec<ChatTtsRound>,
    pub chat_tts_round_gap: Duration,

    /// Destination of the raw PCM diagnostic dump.
    pub dump_path: PathBuf,
}

const DEFAULT_ENDPOINT: &str = "wss://openspeech.bytedance.com/api/v3/realtime/dialogue";
const DEFAULT_RESOURCE_ID: &str = "volc.speech.dialog";
const DEFAULT_APP_KEY: &str = "PlgvMymc7f3tQnJ6";

impl ClientConfig {
    /// Load configuration from the environment (and `.env`, if present).
    ///
    /// # Errors
    /// Returns an error when the credentials are missing, a numeric
    /// variable is malformed, or the endpoint is not a ws/wss URL.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let _ = dotenvy::dotenv();

        let endpoint =
            env::var("VOICELINK_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let resource_id =
            env::var("VOICELINK_RESOURCE_ID").unwrap_or_else(|_| DEFAULT_RESOURCE_ID.to_string());
        let app_id = env::var("VOICELINK_APP_ID").unwrap_or_default();
        let access_key = env::var("VOICELINK_ACCESS_KEY").unwrap_or_default();
        let app_key = env::var("VOICELINK_APP_KEY").unwrap_or_else(|_| DEFAULT_APP_KEY.to_string());

        let bot_name = env::var("VOICELINK_BOT_NAME").unwrap_or_else(|_| "Aria".to_string());
        let system_role = env::var("VOICELINK_SYSTEM_ROLE").unwrap_or_else(|_| {
            "You are a warm, upbeat assistant who enjoys everyday conversation.".to_string()
        });
        let speaking_style = env::var("VOICELINK_SPEAKING_STYLE").unwrap_or_else(|_| {
            "You speak clearly and briefly, at an easy pace and with a natural tone.".to_string()
        });
        let audit_response = env::var("VOICELINK_AUDIT_RESPONSE").unwrap_or_else(|_| {
            "Sorry, I can't help with that one. Pick another topic and I'll do my best."
                .to_string()
        });

        let greeting = env::var("VOICELINK_GREETING")
            .unwrap_or_else(|_| "Hi, I'm Aria. What can I do for you today?".to_string());
        let follow_up_greeting = env::var("VOICELINK_FOLLOW_UP_GREETING").unwrap_or_else(|_| {
            "Still there? I'm happy to keep chatting whenever you are.".to_string()
        });
        let silence_prompt_secs = parse_u64_var("VOICELINK_SILENCE_PROMPT_SECS", 30)?;

        let chat_tts_rounds = vec![
            ChatTtsRound {
                opening: env::var("VOICELINK_CHAT_TTS_ROUND1_OPENING").unwrap_or_else(|_| {
                    "By the way, here's something I wanted to mention".to_string()
                }),
                closing: env::var("VOICELINK_CHAT_TTS_ROUND1_CLOSING")
                    .unwrap_or_else(|_| ", and that's the short version.".to_string()),
            },
            ChatTtsRound {
                opening: env::var("VOICELINK_CHAT_TTS_ROUND2_OPENING")
                    .unwrap_or_else(|_| "One more thing before I forget".to_string()),
                closing: env::var("VOICELINK_CHAT_TTS_ROUND2_CLOSING")
                    .unwrap_or_else(|_| ", alright, back to you.".to_string()),
            },
        ];
        let chat_tts_round_gap_secs = parse_u64_var("VOICELINK_CHAT_TTS_ROUND_GAP_SECS", 10)?;

        let dump_path = env::var("VOICELINK_DUMP_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./output.pcm"));

        validate_endpoint(&endpoint)?;
        validate_credentials(&app_id, &access_key)?;

        Ok(ClientConfig {
            endpoint,
            resource_id,
            app_id,
            access_key,
            app_key,
            bot_name,
            system_role,
            speaking_style,
            audit_response,
            greeting,
            follow_up_greeting,
            silence_prompt: Duration::from_secs(silence_prompt_secs),
            chat_tts_rounds,
            chat_tts_round_gap: Duration::from_secs(chat_tts_round_gap_secs),
            dump_path,
        })
    }

    /// Host portion of the endpoint, for logging.
    pub fn endpoint_host(&self) -> String {
        Url::parse(&self.endpoint)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_else(|| self.endpoint.clone())
    }
}

fn parse_u64_var(name: &str, default: u64) -> Result<u64, Box<dyn std::error::Error>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| format!("invalid {name}: {e}").into()),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required_vars() {
        unsafe {
            env::set_var("VOICELINK_APP_ID", "app-123");
            env::set_var("VOICELINK_ACCESS_KEY", "key-456");
        }
    }

    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("VOICELINK_APP_ID");
            env::remove_var("VOICELINK_ACCESS_KEY");
            env::remove_var("VOICELINK_ENDPOINT");
            env::remove_var("VOICELINK_SILENCE_PROMPT_SECS");
            env::remove_var("VOICELINK_DUMP_PATH");
        }
    }

    #[test]
    #[serial]
    fn loads_defaults_with_credentials_present() {
        cleanup_env_vars();
        set_required_vars();
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.resource_id, DEFAULT_RESOURCE_ID);
        assert_eq!(config.silence_prompt, Duration::from_secs(30));
        assert_eq!(config.chat_tts_round_gap, Duration::from_secs(10));
        assert_eq!(config.chat_tts_rounds.len(), 2);
        assert_eq!(config.dump_path, PathBuf::from("./output.pcm"));
        assert_eq!(config.endpoint_host(), "openspeech.bytedance.com");
        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn missing_credentials_are_rejected() {
        cleanup_env_vars();
        let result = ClientConfig::from_env();
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn non_websocket_endpoint_is_rejected() {
        cleanup_env_vars();
        set_required_vars();
        unsafe {
            env::set_var("VOICELINK_ENDPOINT", "https://example.com/dialog");
        }
        let result = ClientConfig::from_env();
        assert!(result.is_err());
        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn malformed_silence_interval_is_rejected() {
        cleanup_env_vars();
        set_required_vars();
        unsafe {
            env::set_var("VOICELINK_SILENCE_PROMPT_SECS", "soon");
        }
        let result = ClientConfig::from_env();
        assert!(result.is_err());
        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn overrides_apply() {
        cleanup_env_vars();
        set_required_vars();
        unsafe {
            env::set_var("VOICELINK_SILENCE_PROMPT_SECS", "5");
            env::set_var("VOICELINK_DUMP_PATH", "/tmp/dialog.pcm");
        }
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.silence_prompt, Duration::from_secs(5));
        assert_eq!(config.dump_path, PathBuf::from("/tmp/dialog.pcm"));
        cleanup_env_vars();
    }
}
