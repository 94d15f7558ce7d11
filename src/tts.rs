//! Text-to-speech of assistant replies and the persisted voice preferences.

use crate::error::{ViewerError, ViewerResult};
use log::{info, warn};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Storage key of the persisted settings.
pub const STORAGE_KEY: &str = "tts-settings";

pub const SPEED_RANGE: RangeInclusive<f32> = 0.5..=2.0;
pub const VOLUME_RANGE: RangeInclusive<f32> = 0.0..=1.0;

/// `(voice key, display name)` of the voices the synthesis service offers.
pub const AVAILABLE_VOICES: [(&str, &str); 6] = [
    ("fa_IR-amir-medium", "Amir (medium)"),
    ("fa_IR-ganji-medium", "Ganji (medium)"),
    ("fa_IR-ganji_adabi-medium", "Ganji Adabi (medium)"),
    ("fa_IR-gyro-medium", "Gyro (medium)"),
    ("fa_IR-reza_ibrahim-medium", "Reza Ibrahim (medium)"),
    ("fa_IR-mana-medium", "Mana (medium)"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsSettings {
    pub voice_key: String,
    pub speed: f32,
    pub volume: f32,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            voice_key: "fa_IR-mana-medium".to_string(),
            speed: 1.0,
            volume: 1.0,
        }
    }
}

impl TtsSettings {
    /// Settings saved under [`STORAGE_KEY`], or the defaults when there is
    /// no storage or the stored value does not parse.
    pub fn load(storage: Option<&dyn eframe::Storage>) -> Self {
        let Some(raw) = storage.and_then(|s| s.get_string(STORAGE_KEY)) else {
            return Self::default();
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("ignoring unreadable {STORAGE_KEY}: {e}");
                Self::default()
            }
        }
    }

    pub fn save(&self, storage: &mut dyn eframe::Storage) {
        match serde_json::to_string(self) {
            Ok(json) => storage.set_string(STORAGE_KEY, json),
            Err(e) => warn!("could not serialize {STORAGE_KEY}: {e}"),
        }
    }

    /// Output gain for playback, within [`VOLUME_RANGE`].
    pub fn playback_volume(&self) -> f32 {
        self.volume.clamp(*VOLUME_RANGE.start(), *VOLUME_RANGE.end())
    }

    pub fn voice_label(&self) -> &str {
        AVAILABLE_VOICES
            .iter()
            .find(|(key, _)| *key == self.voice_key)
            .map(|(_, label)| *label)
            .unwrap_or(self.voice_key.as_str())
    }
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice_key: &'a str,
    speed: f32,
}

/// Text sent for synthesis: markdown emphasis markers are not spoken.
pub fn speech_text(content: &str) -> String {
    content.replace('*', "")
}

/// Blocking client for the synthesis endpoint.
pub struct TtsClient {
    client: Client,
    url: String,
}

impl TtsClient {
    pub fn new(url: &str, timeout: Duration) -> ViewerResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Synthesize `content`; the returned bytes are the encoded audio.
    pub fn synthesize(&self, content: &str, settings: &TtsSettings) -> ViewerResult<Vec<u8>> {
        let text = speech_text(content);
        if text.trim().is_empty() {
            return Err(ViewerError::Validation("nothing to read aloud".to_string()));
        }
        info!("synthesizing {} chars with {}", text.chars().count(), settings.voice_key);
        let response = self
            .client
            .post(&self.url)
            .json(&SynthesisRequest {
                text: &text,
                voice_key: &settings.voice_key,
                speed: settings.speed,
            })
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ViewerError::Network(format!(
                "TTS service failed with status {}",
                status.as_u16()
            )));
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// Synthesized audio of one assistant message.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Index of the message in the conversation.
    pub message_index: usize,
    pub bytes: Vec<u8>,
}
