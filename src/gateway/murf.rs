//! Murf text-to-speech. Murf hosts the rendered audio and answers with its URL.

use super::{trim_trailing_slash, with_timeout, AudioRef, GatewayError, SpeechRequest, SpeechSynthesizer};
use crate::config::TtsConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const PROVIDER: &str = "murf";

#[derive(Debug, Clone)]
pub struct MurfSynthesizer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    format: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    audio_file: Option<String>,
    audio_length_in_seconds: Option<f64>,
}

impl MurfSynthesizer {
    pub fn new(client: reqwest::Client, api_key: String, config: &TtsConfig) -> Self {
        Self {
            client,
            api_key,
            base_url: trim_trailing_slash(&config.base_url).to_string(),
            format: config.format.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn call(&self, request: &SpeechRequest) -> Result<AudioRef, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/speech/generate", self.base_url))
            .header("api-key", &self.api_key)
            .json(&json!({
                "text": request.text,
                "voiceId": request.voice.voice_id,
                "style": request.voice.style,
                "format": self.format,
            }))
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(PROVIDER, e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(PROVIDER, status.as_u16(), &body));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::from_reqwest(PROVIDER, e, self.timeout))?;

        match parsed.audio_file {
            Some(url) if !url.is_empty() => Ok(AudioRef {
                url,
                duration_seconds: parsed.audio_length_in_seconds,
            }),
            _ => Err(GatewayError::unavailable(PROVIDER, "response has no audioFile")),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for MurfSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioRef, GatewayError> {
        if request.text.trim().is_empty() {
            return Err(GatewayError::rejected(PROVIDER, "text to synthesize is empty"));
        }
        if request.voice.voice_id.trim().is_empty() {
            return Err(GatewayError::rejected(PROVIDER, "voice id is empty"));
        }
        with_timeout(PROVIDER, self.timeout, self.call(request)).await
    }
}
