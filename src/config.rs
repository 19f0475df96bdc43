//! Configuration types for the avatar chat widget.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a widget session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    /// Speech service region, key, voice and recognition locales.
    pub speech: SpeechServiceConfig,
    /// Avatar character selection.
    pub avatar: AvatarConfig,
    /// Chat backend settings.
    pub chat: ChatConfig,
    /// Session lifecycle timing.
    pub session: SessionConfig,
}

/// Speech service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechServiceConfig {
    /// Service region, e.g. `eastus2`. Used to derive endpoints.
    pub region: String,
    /// Subscription key sent with the relay-token request.
    pub subscription_key: String,
    /// Neural voice used in every SSML document.
    pub tts_voice: String,
    /// Candidate locales for continuous language identification. Read by
    /// the recognizer adapter, not by the coordinator.
    pub stt_locales: Vec<String>,
}

impl Default for SpeechServiceConfig {
    fn default() -> Self {
        Self {
            region: "eastus2".to_owned(),
            subscription_key: String::new(),
            tts_voice: "en-US-AndrewMultilingualNeural".to_owned(),
            stt_locales: vec!["en-US".to_owned()],
        }
    }
}

impl SpeechServiceConfig {
    /// Relay-token endpoint for the configured region.
    pub fn relay_token_url(&self) -> String {
        format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/avatar/relay/token/v1",
            self.region
        )
    }

    /// Continuous-recognition websocket endpoint for the configured region.
    pub fn recognition_endpoint(&self) -> String {
        format!(
            "wss://{}.stt.speech.microsoft.com/speech/universal/v2",
            self.region
        )
    }
}

/// Avatar appearance. Passed to the synthesizer adapter when it is built;
/// the coordinator itself never reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// Avatar character name, e.g. `max`.
    pub character: String,
    /// Character style, e.g. `formal`.
    pub style: String,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            character: "max".to_owned(),
            style: "formal".to_owned(),
        }
    }
}

/// Chat backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Endpoint receiving `{session_id, query}` POST requests.
    pub backend_url: String,
    /// Session identity sent with every query. Empty means a random
    /// identifier is generated per coordinator.
    pub session_id: String,
    /// System turn seeded into the conversation history.
    pub system_prompt: String,
    /// Reveal assistant sentences in lockstep with speech instead of
    /// all at once when the reply arrives.
    pub align_display_with_speech: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            backend_url: "https://inventory-va.onrender.com/api/v1/chat/".to_owned(),
            session_id: String::new(),
            system_prompt: "You are a helpful assistant.".to_owned(),
            align_display_with_speech: true,
        }
    }
}

/// Session lifecycle timing and reconnection behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval between liveness samples while the session is active.
    pub health_check_interval_ms: u64,
    /// Settle delay between the video track playing and the session
    /// being declared active.
    pub activation_delay_ms: u64,
    /// Upper bound on waiting for the video track to start playing.
    pub video_start_timeout_ms: u64,
    /// Re-queue the utterance interrupted by a stall so it is spoken
    /// again after reconnection.
    pub repeat_speaking_sentence_after_reconnection: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 2_000,
            activation_delay_ms: 300,
            video_start_timeout_ms: 20_000,
            repeat_speaking_sentence_after_reconnection: true,
        }
    }
}

impl SessionConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn activation_delay(&self) -> Duration {
        Duration::from_millis(self.activation_delay_ms)
    }

    pub fn video_start_timeout(&self) -> Duration {
        Duration::from_millis(self.video_start_timeout_ms)
    }
}

impl WidgetConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::WidgetError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::WidgetError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config_dir>/config.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::widget_dirs::config_file()
    }

    /// Reject values the coordinator cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`WidgetError::Config`](crate::error::WidgetError::Config)
    /// naming the first offending field.
    pub fn validate(&self) -> crate::error::Result<()> {
        let fail = |msg: &str| Err(crate::error::WidgetError::Config(msg.to_owned()));
        if self.session.health_check_interval_ms == 0 {
            return fail("session.health_check_interval_ms must be greater than zero");
        }
        if self.session.video_start_timeout_ms == 0 {
            return fail("session.video_start_timeout_ms must be greater than zero");
        }
        if self.speech.tts_voice.trim().is_empty() {
            return fail("speech.tts_voice must not be empty");
        }
        if self.speech.stt_locales.iter().all(|l| l.trim().is_empty()) {
            return fail("speech.stt_locales must name at least one locale");
        }
        if self.chat.backend_url.trim().is_empty() {
            return fail("chat.backend_url must not be empty");
        }
        Ok(())
    }
}
