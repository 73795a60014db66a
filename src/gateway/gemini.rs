//! Google Gemini `generateContent` over the whole session transcript.

use super::{trim_trailing_slash, with_timeout, GatewayError, ResponseGenerator};
use crate::config::LlmConfig;
use crate::session::{Role, TranscriptView};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROVIDER: &str = "gemini";

#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    system_instruction: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiGenerator {
    pub fn new(client: reqwest::Client, api_key: String, config: &LlmConfig) -> Self {
        Self {
            client,
            api_key,
            base_url: trim_trailing_slash(&config.base_url).to_string(),
            model: config.model.clone(),
            system_instruction: config.system_instruction.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_request<'a>(&'a self, transcript: &'a TranscriptView<'_>) -> GenerateRequest<'a> {
        let contents = transcript
            .iter()
            .map(|turn| Content {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                },
                parts: [Part { text: &turn.content }],
            })
            .collect();

        GenerateRequest {
            contents,
            system_instruction: self
                .system_instruction
                .as_deref()
                .map(|text| SystemInstruction { parts: [Part { text }] }),
        }
    }

    async fn call(&self, request: &GenerateRequest<'_>) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(request)
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
        extract_text(parsed)
    }
}

fn extract_text(response: GenerateResponse) -> Result<String, GatewayError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
            .unwrap_or_else(|| "no candidates returned".to_string());
        return Err(GatewayError::rejected(PROVIDER, format!("prompt blocked: {}", reason)));
    };

    let text: String = candidate
        .content
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "empty".to_string());
        return Err(GatewayError::rejected(PROVIDER, format!("no text in reply (finish reason: {})", reason)));
    }
    Ok(text)
}

#[async_trait]
impl ResponseGenerator for GeminiGenerator {
    async fn generate(&self, transcript: &TranscriptView<'_>) -> Result<String, GatewayError> {
        if transcript.is_empty() {
            return Err(GatewayError::rejected(PROVIDER, "transcript is empty"));
        }
        let request = self.build_request(transcript);
        with_timeout(PROVIDER, self.timeout, self.call(&request)).await
    }
}
