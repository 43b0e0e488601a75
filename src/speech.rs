//! # Speech Recognition Module
//!
//! Voice notes are transcribed by the hosted speech-to-text service. The
//! duration ceiling is enforced before anything is downloaded, so long
//! recordings never reach the service.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::SpeechError;

pub const RECOGNIZE_URL: &str = "https://stt.api.cloud.yandex.net/speech/v1/stt:recognize";

/// Audio-to-text service
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn recognize(&self, audio: Vec<u8>) -> Result<String, SpeechError>;
}

/// Reject voice notes above the configured length
pub fn check_voice_duration(seconds: u32, limit: u32) -> Result<(), SpeechError> {
    if seconds > limit {
        return Err(SpeechError::TooLong {
            actual: seconds,
            limit,
        });
    }
    Ok(())
}

#[derive(Deserialize)]
struct RecognizeResponse {
    result: Option<String>,
}

/// Yandex SpeechKit client for short OGG/Opus voice notes
pub struct YandexSpeechKit {
    http: reqwest::Client,
    api_key: String,
    lang: String,
}

impl YandexSpeechKit {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            lang: "ru-RU".to_string(),
        }
    }
}

#[async_trait]
impl SpeechToText for YandexSpeechKit {
    async fn recognize(&self, audio: Vec<u8>) -> Result<String, SpeechError> {
        debug!(audio_bytes = audio.len(), lang = %self.lang, "Sending audio for recognition");

        let response = self
            .http
            .post(RECOGNIZE_URL)
            .query(&[("lang", self.lang.as_str())])
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .body(audio)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "Speech recognition request failed");
            return Err(SpeechError::Network(format!("speech service returned {status}: {text}")));
        }

        let parsed: RecognizeResponse = response.json().await?;
        match parsed.result.map(|text| text.trim().to_string()) {
            Some(text) if !text.is_empty() => {
                info!(chars = text.chars().count(), "Voice note transcribed");
                Ok(text)
            }
            _ => Err(SpeechError::Unrecognized),
        }
    }
}

/// Stand-in used when no speech key is configured
pub struct DisabledSpeech;

#[async_trait]
impl SpeechToText for DisabledSpeech {
    async fn recognize(&self, _audio: Vec<u8>) -> Result<String, SpeechError> {
        Err(SpeechError::NotConfigured)
    }
}
