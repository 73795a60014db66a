//! AssemblyAI speech-to-text: upload the audio, submit a transcript job, poll until done.

use super::{trim_trailing_slash, with_timeout, AudioClip, GatewayError, Transcriber};
use crate::config::TranscriptionConfig;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "assemblyai";

#[derive(Debug, Clone)]
pub struct AssemblyAiTranscriber {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    language_code: Option<String>,
    timeout: Duration,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    id: String,
    status: String,
    text: Option<String>,
    error: Option<String>,
}

impl AssemblyAiTranscriber {
    pub fn new(client: reqwest::Client, api_key: String, config: &TranscriptionConfig) -> Self {
        Self {
            client,
            api_key,
            base_url: trim_trailing_slash(&config.base_url).to_string(),
            language_code: config.language_code.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn upload(&self, audio: &AudioClip) -> Result<String, GatewayError> {
        let content_type = audio.content_type.as_deref().unwrap_or("application/octet-stream");
        debug!(
            filename = ?audio.filename,
            content_type,
            size_in_bytes = audio.bytes.len(),
            "Uploading audio"
        );

        let response = self
            .client
            .post(format!("{}/v2/upload", self.base_url))
            .header(AUTHORIZATION, &self.api_key)
            .header(CONTENT_TYPE, content_type)
            .body(audio.bytes.clone())
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let upload: UploadResponse = self.parse(response).await?;
        Ok(upload.upload_url)
    }

    async fn submit(&self, audio_url: &str) -> Result<TranscriptResponse, GatewayError> {
        let mut body = json!({ "audio_url": audio_url });
        if let Some(language) = &self.language_code {
            body["language_code"] = json!(language);
        }

        let response = self
            .client
            .post(format!("{}/v2/transcript", self.base_url))
            .header(AUTHORIZATION, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.parse(response).await
    }

    async fn poll(&self, id: &str) -> Result<TranscriptResponse, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v2/transcript/{}", self.base_url, id))
            .header(AUTHORIZATION, &self.api_key)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.parse(response).await
    }

    async fn run(&self, audio: &AudioClip) -> Result<String, GatewayError> {
        let audio_url = self.upload(audio).await?;
        let mut transcript = self.submit(&audio_url).await?;
        debug!(transcript_id = %transcript.id, "Transcript job submitted");

        loop {
            match transcript.status.as_str() {
                "completed" => return Ok(transcript.text.unwrap_or_default()),
                "error" => {
                    let reason = transcript.error.unwrap_or_else(|| "unknown error".to_string());
                    return Err(GatewayError::rejected(PROVIDER, reason));
                }
                _ => {
                    tokio::time::sleep(self.poll_interval).await;
                    transcript = self.poll(&transcript.id).await?;
                }
            }
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(PROVIDER, status.as_u16(), &body));
        }
        response.json::<T>().await.map_err(|e| self.transport(e))
    }

    fn transport(&self, err: reqwest::Error) -> GatewayError {
        GatewayError::from_reqwest(PROVIDER, err, self.timeout)
    }
}

#[async_trait]
impl Transcriber for AssemblyAiTranscriber {
    async fn transcribe(&self, audio: &AudioClip) -> Result<String, GatewayError> {
        if audio.bytes.is_empty() {
            return Err(GatewayError::rejected(PROVIDER, "audio payload is empty"));
        }
        with_timeout(PROVIDER, self.timeout, self.run(audio)).await
    }
}
